//! Extractor stage: per-paper contribution extraction plus full-text
//! enrichment.
//!
//! Each approved paper gets two concurrent LLM calls (one-sentence core
//! contribution and the 8-field structured summary) under a global
//! concurrency bound. Paper-level failures are isolated: a failed paper is
//! dropped and counted, the stage keeps going.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::Semaphore;

use super::StageContext;
use crate::error::{LlmError, WorkflowError};
use crate::fulltext;
use crate::llm::{structured_completion, ChatMessage, CompletionParams};
use crate::prompts;
use crate::schema::{Paper, StructuredContribution};
use crate::workflow::state::{SessionState, StateUpdate};

#[derive(Debug, Deserialize, JsonSchema)]
struct ContributionExtraction {
    core_contribution: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct StructuredExtraction {
    #[serde(default)]
    problem: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    novelty: Option<String>,
    #[serde(default)]
    dataset: Option<String>,
    #[serde(default)]
    baseline: Option<String>,
    #[serde(default)]
    results: Option<String>,
    #[serde(default)]
    limitations: Option<String>,
    #[serde(default)]
    future_work: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Run both extraction calls for one paper and attach the results.
async fn extract_contribution(ctx: &StageContext, paper: &Paper) -> Result<Paper, LlmError> {
    let core_call = structured_completion::<ContributionExtraction>(
        ctx.llm.as_ref(),
        &ctx.costs,
        vec![
            ChatMessage::system(prompts::CONTRIBUTION_SYSTEM),
            ChatMessage::user(prompts::contribution_user(
                &paper.title,
                paper.year,
                &paper.abstract_text,
            )),
        ],
        CompletionParams::default(),
    );

    let structured_call = structured_completion::<StructuredExtraction>(
        ctx.llm.as_ref(),
        &ctx.costs,
        vec![
            ChatMessage::system(prompts::STRUCTURED_EXTRACTION_SYSTEM),
            ChatMessage::user(prompts::structured_extraction_user(
                &paper.title,
                paper.year,
                &paper.abstract_text,
            )),
        ],
        CompletionParams::default(),
    );

    let (core, structured) = tokio::try_join!(core_call, structured_call)?;

    if core.core_contribution.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }

    let structured = StructuredContribution {
        problem: non_empty(structured.problem),
        method: non_empty(structured.method),
        novelty: non_empty(structured.novelty),
        dataset: non_empty(structured.dataset),
        baseline: non_empty(structured.baseline),
        results: non_empty(structured.results),
        limitations: non_empty(structured.limitations),
        future_work: non_empty(structured.future_work),
    };

    let mut extracted = paper.clone();
    extracted.core_contribution = Some(core.core_contribution);
    extracted.structured_contribution = Some(structured);
    Ok(extracted)
}

/// Extract contributions for every approved candidate, then enrich papers
/// lacking a PDF URL through the full-text resolver.
pub async fn execute(
    ctx: &StageContext,
    state: &SessionState,
) -> Result<StateUpdate, WorkflowError> {
    let approved: Vec<&Paper> = state.approved_candidates();

    if approved.is_empty() {
        let log = "No approved papers to process".to_string();
        tracing::warn!("extractor: {log}");
        return Ok(StateUpdate {
            approved_papers: Some(Vec::new()),
            logs: vec![log],
            ..StateUpdate::default()
        });
    }

    tracing::info!(papers = approved.len(), "extractor: extracting contributions");

    let semaphore = Arc::new(Semaphore::new(ctx.limits.llm_concurrency.max(1)));
    let tasks = approved.iter().map(|paper| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            extract_contribution(ctx, paper).await
        }
    });
    let results = futures::future::join_all(tasks).await;

    let mut extracted: Vec<Paper> = Vec::new();
    let mut failed_count = 0usize;
    for (result, paper) in results.into_iter().zip(&approved) {
        match result {
            Ok(p) => extracted.push(p),
            Err(e) => {
                tracing::error!(
                    title = %paper.title.chars().take(60).collect::<String>(),
                    paper_id = %paper.paper_id,
                    error = %e,
                    "Contribution extraction failed"
                );
                failed_count += 1;
            }
        }
    }

    let mut log = format!("Extracted contributions from {} papers", extracted.len());
    if failed_count > 0 {
        log.push_str(&format!(" ({failed_count} failed - check logs for details)"));
    }
    tracing::info!("extractor: {log}");
    let mut logs = vec![log];

    let needing_pdf = extracted.iter().filter(|p| p.pdf_url.is_none()).count();
    if needing_pdf > 0 {
        tracing::info!(papers = needing_pdf, "extractor: enriching with full-text URLs");
        let enriched = fulltext::enrich_papers(
            &ctx.http,
            &ctx.scholar,
            extracted,
            ctx.limits.fulltext_concurrency,
        )
        .await;
        let pdf_count = enriched.iter().filter(|p| p.pdf_url.is_some()).count();
        let pdf_log = format!(
            "Found full-text PDFs for {pdf_count}/{} papers",
            enriched.len()
        );
        tracing::info!("extractor: {pdf_log}");
        logs.push(pdf_log);
        extracted = enriched;
    }

    Ok(StateUpdate {
        approved_papers: Some(extracted),
        logs,
        ..StateUpdate::default()
    })
}
