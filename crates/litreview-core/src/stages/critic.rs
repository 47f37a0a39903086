//! Critic stage: structural citation checks plus optional semantic
//! claim verification.
//!
//! Layer 1 is rule-based and short-circuits: out-of-range indices, sections
//! with zero citations, and approved-but-never-cited papers are errors.
//! Layer 2 runs only when layer 1 passes and the feature is enabled; a low
//! entailment ratio fails QA, but extraction or verification exceptions
//! degrade gracefully and pass the draft through.

use std::collections::BTreeSet;

use super::StageContext;
use crate::error::WorkflowError;
use crate::verify::{citation_indices, verify_draft_citations};
use crate::workflow::state::{SessionState, StateUpdate};

/// Validate the current draft. On failure the retry counter is bumped and
/// the errors are stored for the Writer's retry prompt.
pub async fn execute(
    ctx: &StageContext,
    state: &SessionState,
) -> Result<StateUpdate, WorkflowError> {
    let Some(draft) = &state.final_draft else {
        let log = "QA skipped: no draft to evaluate".to_string();
        tracing::warn!("critic: {log}");
        return Ok(StateUpdate {
            qa_errors: Some(Vec::new()),
            logs: vec![log],
            ..StateUpdate::default()
        });
    };

    let num_papers = state.approved_papers.len();
    let mut errors: Vec<String> = Vec::new();
    let mut all_cited: BTreeSet<usize> = BTreeSet::new();

    for (section_idx, section) in draft.sections.iter().enumerate() {
        let cited: BTreeSet<usize> = citation_indices(&section.content).into_iter().collect();

        for &idx in &cited {
            if idx < 1 || idx > num_papers {
                errors.push(format!(
                    "Section {}: Hallucinated citation index {idx} (valid range: 1-{num_papers})",
                    section_idx + 1
                ));
            }
        }

        if cited.is_empty() {
            errors.push(format!(
                "Section {}: No citations found in content",
                section_idx + 1
            ));
        }

        all_cited.extend(cited);
    }

    for idx in 1..=num_papers {
        if !all_cited.contains(&idx) {
            errors.push(format!(
                "Missing citation: paper [{idx}] was approved but not cited"
            ));
        }
    }

    let mut retry_count = state.retry_count;

    if !errors.is_empty() {
        retry_count += 1;
        let preview: Vec<&String> = errors.iter().take(3).collect();
        let log = format!(
            "QA failed with {} errors (retry {retry_count}/{}): {preview:?}",
            errors.len(),
            ctx.limits.max_retry_count
        );
        tracing::warn!("critic: {log}");
        return Ok(StateUpdate {
            qa_errors: Some(errors),
            retry_count: Some(retry_count),
            logs: vec![log],
            ..StateUpdate::default()
        });
    }

    // Layer 2: semantic verification, only on a structurally clean draft.
    let mut claim_verification = None;
    if ctx.limits.claim_verification_enabled && !state.approved_papers.is_empty() {
        tracing::info!("critic: starting claim-level verification");
        let (_claims, summary) = verify_draft_citations(
            ctx.llm.as_ref(),
            &ctx.costs,
            draft,
            &state.approved_papers,
            ctx.limits.claim_verification_concurrency,
        )
        .await;

        if summary.total_verifications > 0 {
            #[allow(clippy::cast_precision_loss)]
            let entailment_ratio =
                summary.entails_count as f64 / summary.total_verifications as f64;
            tracing::info!(
                entails = summary.entails_count,
                total = summary.total_verifications,
                ratio = entailment_ratio,
                "critic: claim verification complete"
            );

            if entailment_ratio < ctx.limits.min_entailment_ratio {
                let mut failed_details: Vec<String> = Vec::new();
                for v in summary.failed_verifications.iter().take(3) {
                    failed_details.push(format!(
                        "Claim '{}...' citing [{}] ({}): {}",
                        v.claim_text.chars().take(50).collect::<String>(),
                        v.citation_index,
                        v.label.as_str(),
                        v.rationale.chars().take(100).collect::<String>()
                    ));
                }
                retry_count += 1;
                let log = format!(
                    "QA failed: citation support ratio {:.1}% < {:.0}% threshold",
                    entailment_ratio * 100.0,
                    ctx.limits.min_entailment_ratio * 100.0
                );
                tracing::warn!("critic: {log}");
                return Ok(StateUpdate {
                    qa_errors: Some(failed_details),
                    retry_count: Some(retry_count),
                    claim_verification: Some(Some(summary)),
                    logs: vec![log],
                    ..StateUpdate::default()
                });
            }
        }

        claim_verification = Some(Some(summary));
    }

    let mut log = "QA passed: all citations verified".to_string();
    if let Some(Some(summary)) = &claim_verification {
        log.push_str(&format!(
            " (semantic: {}/{} entails)",
            summary.entails_count, summary.total_verifications
        ));
    }
    tracing::info!("critic: {log}");

    Ok(StateUpdate {
        qa_errors: Some(Vec::new()),
        retry_count: Some(retry_count),
        claim_verification,
        logs: vec![log],
        ..StateUpdate::default()
    })
}
