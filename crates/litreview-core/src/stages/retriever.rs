//! Retriever stage: fan keyword searches out across the chosen sources.

use super::StageContext;
use crate::error::WorkflowError;
use crate::scholar;
use crate::workflow::state::{SessionState, StateUpdate};

/// Search every configured source for every keyword, deduplicate, and store
/// the candidate set. Missing keywords short-circuit to an empty set.
pub async fn execute(
    ctx: &StageContext,
    state: &SessionState,
) -> Result<StateUpdate, WorkflowError> {
    if state.search_keywords.is_empty() {
        let log = "No search keywords available, skipping search".to_string();
        tracing::warn!("retriever: {log}");
        return Ok(StateUpdate {
            candidate_papers: Some(Vec::new()),
            logs: vec![log],
            ..StateUpdate::default()
        });
    }

    let source_names: Vec<&str> = state.search_sources.iter().map(|s| s.key()).collect();
    tracing::info!(
        keywords = state.search_keywords.len(),
        sources = ?source_names,
        "retriever: searching"
    );

    let papers = scholar::search_multi_source(
        &ctx.http,
        &ctx.scholar,
        &ctx.sources,
        &ctx.limits,
        &state.search_keywords,
        &state.search_sources,
    )
    .await;

    let log = format!(
        "Found {} unique papers across {} queries from {:?}",
        papers.len(),
        state.search_keywords.len(),
        source_names
    );
    tracing::info!("retriever: {log}");

    Ok(StateUpdate {
        candidate_papers: Some(papers),
        logs: vec![log],
        ..StateUpdate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScholarSettings;
    use crate::schema::PaperSource;
    use crate::testing::{context_with, scripted_llm, state_with_query};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn empty_keywords_short_circuit() {
        let ctx = context_with(scripted_llm(vec![]), ScholarSettings::default());
        let state = state_with_query("anything");

        let update = execute(&ctx, &state).await.expect("retrieve");
        assert_eq!(update.candidate_papers.expect("set").len(), 0);
        assert!(update.logs[0].contains("skipping search"));
    }

    #[tokio::test]
    async fn retrieves_and_dedups_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"paperId": "s2-1", "title": "Paper One", "authors": [], "abstract": "A", "url": "u", "year": 2020},
                    {"paperId": "s2-2", "title": "Paper Two", "authors": [], "abstract": "B", "url": "u", "year": 2021}
                ]
            })))
            .mount(&server)
            .await;

        let settings = ScholarSettings {
            semantic_scholar_base: server.uri(),
            ..ScholarSettings::default()
        };
        let ctx = context_with(scripted_llm(vec![]), settings);
        let mut state = state_with_query("transformers");
        state.search_keywords = vec!["transformers".to_string()];
        state.search_sources = vec![PaperSource::SemanticScholar];

        let update = execute(&ctx, &state).await.expect("retrieve");
        let papers = update.candidate_papers.expect("set");
        assert_eq!(papers.len(), 2);
        assert!(update.logs[0].contains("Found 2 unique papers"));
    }
}
