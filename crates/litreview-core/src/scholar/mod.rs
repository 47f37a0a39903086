//! Scholarly search: per-source clients, failure gating, and deduplication.
//!
//! `search_multi_source` fans one query per keyword out to every requested
//! source, skips sources the failure tracker has tripped on, and collapses
//! duplicates across sources.

pub mod arxiv;
pub mod pubmed;
pub mod semantic_scholar;
pub mod tracker;

use std::collections::{HashMap, HashSet};

use crate::config::{Limits, ScholarSettings};
use crate::schema::{Paper, PaperSource};

pub use tracker::SourceTracker;

/// Normalize a title for cross-source deduplication: lowercase, keep
/// alphanumerics and spaces, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deduplicate papers first by `paper_id`, then by normalized title.
///
/// On a title collision a semantic-scholar entry replaces a previously
/// recorded arXiv/PubMed entry; otherwise first-seen wins.
pub fn deduplicate_papers(papers: Vec<Paper>) -> Vec<Paper> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    // normalized title -> paper_id currently holding that title
    let mut seen_titles: HashMap<String, String> = HashMap::new();
    let mut result: Vec<Paper> = Vec::new();

    for paper in papers {
        if !seen_ids.insert(paper.paper_id.clone()) {
            continue;
        }

        let normalized = normalize_title(&paper.title);
        match seen_titles.get(&normalized) {
            Some(existing_id) => {
                if paper.source == PaperSource::SemanticScholar {
                    let existing_id = existing_id.clone();
                    result.retain(|p| p.paper_id != existing_id);
                    seen_titles.insert(normalized, paper.paper_id.clone());
                    result.push(paper);
                }
            }
            None => {
                seen_titles.insert(normalized, paper.paper_id.clone());
                result.push(paper);
            }
        }
    }

    result
}

/// Search the requested sources in parallel and return the deduplicated
/// candidate set.
///
/// Sources the tracker marks as failing are silently excluded. A source
/// whose search fails outright is recorded in the tracker and contributes
/// nothing; success clears its history. An empty source list yields an
/// empty result without error.
pub async fn search_multi_source(
    client: &reqwest::Client,
    settings: &ScholarSettings,
    source_tracker: &SourceTracker,
    limits: &Limits,
    queries: &[String],
    sources: &[PaperSource],
) -> Vec<Paper> {
    let mut active: Vec<PaperSource> = Vec::new();
    for source in sources {
        if source_tracker.should_skip(source.key()) {
            tracing::warn!(
                "Skipping {} due to recent failures",
                source.display_name()
            );
        } else {
            active.push(*source);
        }
    }

    if active.is_empty() {
        return Vec::new();
    }

    let searches = active.iter().map(|source| async move {
        match source {
            PaperSource::SemanticScholar => {
                semantic_scholar::search(client, settings, queries, limits.papers_per_query).await
            }
            PaperSource::Arxiv => {
                arxiv::search(client, settings, queries, limits.papers_per_query).await
            }
            PaperSource::Pubmed => {
                pubmed::search(client, settings, queries, limits.papers_per_query).await
            }
        }
    });
    let results = futures::future::join_all(searches).await;

    let mut all_papers: Vec<Paper> = Vec::new();
    for (source, result) in active.iter().zip(results) {
        match result {
            Ok(papers) => {
                source_tracker.record_success(source.key());
                all_papers.extend(papers);
            }
            Err(e) => {
                tracing::error!(
                    source = source.key(),
                    error = %e,
                    "Search from {} failed",
                    source.display_name()
                );
                source_tracker.record_failure(source.key());
            }
        }
    }

    deduplicate_papers(all_papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str, title: &str, source: PaperSource) -> Paper {
        Paper {
            paper_id: id.to_string(),
            title: title.to_string(),
            authors: vec!["A. Author".to_string()],
            abstract_text: String::new(),
            url: String::new(),
            year: None,
            doi: None,
            pdf_url: None,
            is_approved: false,
            core_contribution: None,
            structured_contribution: None,
            source,
        }
    }

    #[test]
    fn normalize_title_strips_punctuation_and_case() {
        assert_eq!(
            normalize_title("  Attention Is All  You Need!  "),
            "attention is all you need"
        );
        assert_eq!(normalize_title("BERT: Pre-training"), "bert pretraining");
    }

    #[test]
    fn dedup_drops_repeated_ids() {
        let papers = vec![
            paper("a", "First", PaperSource::Arxiv),
            paper("a", "First", PaperSource::Arxiv),
        ];
        assert_eq!(deduplicate_papers(papers).len(), 1);
    }

    #[test]
    fn dedup_prefers_semantic_scholar_on_title_collision() {
        let papers = vec![
            paper("arxiv:1", "Attention Is All You Need", PaperSource::Arxiv),
            paper("s2-1", "Attention is all you need.", PaperSource::SemanticScholar),
        ];
        let deduped = deduplicate_papers(papers);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].paper_id, "s2-1");
        assert_eq!(deduped[0].source, PaperSource::SemanticScholar);
    }

    #[test]
    fn dedup_first_seen_wins_between_equal_sources() {
        let papers = vec![
            paper("arxiv:1", "Shared Title", PaperSource::Arxiv),
            paper("pubmed:2", "shared title", PaperSource::Pubmed),
        ];
        let deduped = deduplicate_papers(papers);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].paper_id, "arxiv:1");
    }

    #[test]
    fn dedup_is_idempotent() {
        let papers = vec![
            paper("arxiv:1", "Title One", PaperSource::Arxiv),
            paper("s2-1", "Title One!", PaperSource::SemanticScholar),
            paper("pubmed:3", "Title Two", PaperSource::Pubmed),
        ];
        let once = deduplicate_papers(papers);
        let twice = deduplicate_papers(once.clone());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn empty_source_list_returns_empty() {
        let client = reqwest::Client::new();
        let settings = ScholarSettings::default();
        let tracker = SourceTracker::default();
        let limits = Limits::default();

        let papers = search_multi_source(
            &client,
            &settings,
            &tracker,
            &limits,
            &["anything".to_string()],
            &[],
        )
        .await;
        assert!(papers.is_empty());
    }

    #[tokio::test]
    async fn tripped_source_is_excluded_without_failing() {
        let client = reqwest::Client::new();
        let settings = ScholarSettings::default();
        let tracker = SourceTracker::default();
        let limits = Limits::default();

        for _ in 0..3 {
            tracker.record_failure("arxiv");
        }

        // Only arXiv requested and it is tripped: nothing runs, nothing fails.
        let papers = search_multi_source(
            &client,
            &settings,
            &tracker,
            &limits,
            &["q".to_string()],
            &[PaperSource::Arxiv],
        )
        .await;
        assert!(papers.is_empty());
    }
}
