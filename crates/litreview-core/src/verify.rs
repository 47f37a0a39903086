//! Claim-level semantic citation verification.
//!
//! An LLM claim extractor splits cited sections into atomic claims; each
//! (claim, cited paper) pair is then judged for entailment against the
//! paper's title, abstract, and core contribution. Extraction failures
//! degrade to an empty claim list; verification failures drop the pair.

use std::sync::Arc;

use regex::Regex;
use tokio::sync::Semaphore;

use crate::cost::CostTracker;
use crate::error::LlmError;
use crate::llm::{structured_completion, ChatClient, ChatMessage, CompletionParams};
use crate::prompts;
use crate::schema::{
    Claim, ClaimVerification, ClaimVerificationSummary, Draft, EntailmentLabel, Paper,
};

/// Temperature for extraction and verification calls.
const VERIFIER_TEMPERATURE: f32 = 0.1;

/// Evidence snippets are truncated to this many chars.
const MAX_EVIDENCE_CHARS: usize = 500;

/// Rationales are truncated to this many chars.
const MAX_RATIONALE_CHARS: usize = 200;

/// Abstract text passed to the verifier is truncated to this many chars.
const MAX_ABSTRACT_CHARS: usize = 1000;

/// Matcher for `{cite:N}` markers. Case-sensitive, no inner whitespace.
pub fn cite_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{cite:(\d+)\}").expect("valid cite regex"))
}

/// Extract the 1-based citation indices appearing in a text.
pub fn citation_indices(text: &str) -> Vec<usize> {
    cite_pattern()
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .collect()
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ClaimList {
    claims: Vec<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct VerificationOutput {
    label: String,
    confidence: f64,
    evidence_snippet: String,
    rationale: String,
}

/// Split one section into atomic claims that retain citation markers.
///
/// Sections without any `{cite:N}` marker are skipped without an LLM call.
pub async fn extract_claims_from_section(
    llm: &dyn ChatClient,
    costs: &CostTracker,
    section_index: usize,
    section_title: &str,
    section_content: &str,
) -> Result<Vec<Claim>, LlmError> {
    if !cite_pattern().is_match(section_content) {
        return Ok(Vec::new());
    }

    let result: ClaimList = structured_completion(
        llm,
        costs,
        vec![
            ChatMessage::system(prompts::CLAIM_EXTRACTION_SYSTEM),
            ChatMessage::user(prompts::claim_extraction_user(section_title, section_content)),
        ],
        CompletionParams {
            temperature: VERIFIER_TEMPERATURE,
            max_tokens: None,
        },
    )
    .await?;

    let claims = result
        .claims
        .into_iter()
        .enumerate()
        .filter_map(|(i, text)| {
            let indices = citation_indices(&text);
            if indices.is_empty() {
                None
            } else {
                Some(Claim {
                    claim_id: format!("s{section_index}_c{i}"),
                    text,
                    section_index,
                    citation_indices: indices,
                })
            }
        })
        .collect();

    Ok(claims)
}

/// Extract claims from every section, tolerating per-section failures.
pub async fn extract_all_claims(
    llm: &dyn ChatClient,
    costs: &CostTracker,
    draft: &Draft,
) -> Vec<Claim> {
    let tasks = draft.sections.iter().enumerate().map(|(i, section)| async move {
        match extract_claims_from_section(llm, costs, i, &section.heading, &section.content).await {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(section = i, error = %e, "Failed to extract claims from section");
                Vec::new()
            }
        }
    });
    futures::future::join_all(tasks)
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Verify one (claim, cited paper) pair.
pub async fn verify_single_claim(
    llm: &dyn ChatClient,
    costs: &CostTracker,
    claim: &Claim,
    citation_index: usize,
    paper: &Paper,
) -> Result<ClaimVerification, LlmError> {
    let abstract_excerpt: String = paper.abstract_text.chars().take(MAX_ABSTRACT_CHARS).collect();
    let result: VerificationOutput = structured_completion(
        llm,
        costs,
        vec![
            ChatMessage::system(prompts::CLAIM_VERIFICATION_SYSTEM),
            ChatMessage::user(prompts::claim_verification_user(
                &claim.text,
                citation_index,
                &paper.title,
                &abstract_excerpt,
                paper.core_contribution.as_deref().unwrap_or("Not available"),
            )),
        ],
        CompletionParams {
            temperature: VERIFIER_TEMPERATURE,
            max_tokens: None,
        },
    )
    .await?;

    Ok(ClaimVerification {
        claim_id: claim.claim_id.clone(),
        claim_text: claim.text.clone(),
        citation_index,
        paper_title: paper.title.clone(),
        label: EntailmentLabel::from_model_label(&result.label),
        confidence: result.confidence.clamp(0.0, 1.0),
        evidence_snippet: result
            .evidence_snippet
            .chars()
            .take(MAX_EVIDENCE_CHARS)
            .collect(),
        rationale: result.rationale.chars().take(MAX_RATIONALE_CHARS).collect(),
    })
}

/// Verify all (claim, index) pairs with bounded concurrency.
///
/// Pairs whose index has no matching paper are skipped; pairs whose
/// verification call fails are dropped with a warning.
pub async fn verify_claims(
    llm: &dyn ChatClient,
    costs: &CostTracker,
    claims: &[Claim],
    papers: &[Paper],
    concurrency: usize,
) -> Vec<ClaimVerification> {
    let mut pairs: Vec<(&Claim, usize, &Paper)> = Vec::new();
    for claim in claims {
        for &index in &claim.citation_indices {
            if index >= 1 && index <= papers.len() {
                pairs.push((claim, index, &papers[index - 1]));
            }
        }
    }
    if pairs.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let tasks = pairs.into_iter().map(|(claim, index, paper)| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            match verify_single_claim(llm, costs, claim, index, paper).await {
                Ok(verification) => Some(verification),
                Err(e) => {
                    tracing::warn!(
                        claim_id = %claim.claim_id,
                        citation_index = index,
                        error = %e,
                        "Failed to verify claim"
                    );
                    None
                }
            }
        }
    });

    futures::future::join_all(tasks)
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Aggregate verification results into a summary.
pub fn summarize_verifications(
    claims: &[Claim],
    results: Vec<ClaimVerification>,
) -> ClaimVerificationSummary {
    let entails = results
        .iter()
        .filter(|r| r.label == EntailmentLabel::Entails)
        .count();
    let insufficient = results
        .iter()
        .filter(|r| r.label == EntailmentLabel::Insufficient)
        .count();
    let contradicts = results
        .iter()
        .filter(|r| r.label == EntailmentLabel::Contradicts)
        .count();
    let total = results.len();
    let failed = results
        .into_iter()
        .filter(|r| r.label != EntailmentLabel::Entails)
        .collect();

    ClaimVerificationSummary {
        total_claims: claims.len(),
        total_verifications: total,
        entails_count: entails,
        insufficient_count: insufficient,
        contradicts_count: contradicts,
        failed_verifications: failed,
    }
}

/// Run the full pipeline: extract claims from the draft, verify each
/// against its cited papers, summarize.
pub async fn verify_draft_citations(
    llm: &dyn ChatClient,
    costs: &CostTracker,
    draft: &Draft,
    papers: &[Paper],
    concurrency: usize,
) -> (Vec<Claim>, ClaimVerificationSummary) {
    tracing::info!(
        sections = draft.sections.len(),
        "Extracting claims from draft"
    );
    let claims = extract_all_claims(llm, costs, draft).await;
    tracing::info!(claims = claims.len(), "Extracted claims with citations");

    if claims.is_empty() {
        return (claims, ClaimVerificationSummary::default());
    }

    let results = verify_claims(llm, costs, &claims, papers, concurrency).await;
    tracing::info!(verifications = results.len(), "Completed verifications");

    let summary = summarize_verifications(&claims, results);
    (claims, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verification(label: EntailmentLabel) -> ClaimVerification {
        ClaimVerification {
            claim_id: "s0_c0".to_string(),
            claim_text: "claim".to_string(),
            citation_index: 1,
            paper_title: "Paper".to_string(),
            label,
            confidence: 0.9,
            evidence_snippet: String::new(),
            rationale: String::new(),
        }
    }

    fn claim(indices: Vec<usize>) -> Claim {
        Claim {
            claim_id: "s0_c0".to_string(),
            text: "text".to_string(),
            section_index: 0,
            citation_indices: indices,
        }
    }

    #[test]
    fn citation_indices_parses_markers() {
        assert_eq!(
            citation_indices("a {cite:1} b {cite:12} c"),
            vec![1, 12]
        );
        assert!(citation_indices("no markers").is_empty());
        // Whitespace inside the marker is not permitted.
        assert!(citation_indices("{cite: 1}").is_empty());
        // Case-sensitive.
        assert!(citation_indices("{Cite:1}").is_empty());
    }

    #[test]
    fn summary_counts_labels() {
        let claims = vec![claim(vec![1]), claim(vec![2])];
        let results = vec![
            verification(EntailmentLabel::Entails),
            verification(EntailmentLabel::Insufficient),
            verification(EntailmentLabel::Contradicts),
        ];
        let summary = summarize_verifications(&claims, results);

        assert_eq!(summary.total_claims, 2);
        assert_eq!(summary.total_verifications, 3);
        assert_eq!(summary.entails_count, 1);
        assert_eq!(summary.insufficient_count, 1);
        assert_eq!(summary.contradicts_count, 1);
        assert_eq!(summary.failed_verifications.len(), 2);
    }

    #[tokio::test]
    async fn verify_claims_skips_out_of_range_indices() {
        // No papers: every pair is out of range, so no LLM call happens and
        // the panicking client below is never used.
        struct PanicClient;

        #[async_trait::async_trait]
        impl ChatClient for PanicClient {
            fn model(&self) -> &str {
                "panic"
            }
            async fn complete_json(
                &self,
                _messages: &[ChatMessage],
                _params: &CompletionParams,
            ) -> Result<crate::llm::LlmResponse, LlmError> {
                panic!("must not be called");
            }
        }

        let costs = CostTracker::new();
        let claims = vec![claim(vec![5])];
        let papers: Vec<Paper> = vec![];
        let results = verify_claims(&PanicClient, &costs, &claims, &papers, 2).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn extract_skips_sections_without_citations() {
        struct PanicClient;

        #[async_trait::async_trait]
        impl ChatClient for PanicClient {
            fn model(&self) -> &str {
                "panic"
            }
            async fn complete_json(
                &self,
                _messages: &[ChatMessage],
                _params: &CompletionParams,
            ) -> Result<crate::llm::LlmResponse, LlmError> {
                panic!("must not be called");
            }
        }

        let costs = CostTracker::new();
        let claims = extract_claims_from_section(
            &PanicClient,
            &costs,
            0,
            "Intro",
            "No citations here.",
        )
        .await
        .expect("no call");
        assert!(claims.is_empty());
    }
}
