//! Writer stage: produce the titled, sectioned draft with `{cite:N}`
//! markers.
//!
//! Two execution paths: a fresh draft runs an outline call followed by one
//! call per section; retries and continuations run a single-shot call with
//! the matching addendum. The writer never repairs citations, it only logs
//! out-of-bounds markers; judging is the critic's job.

use std::collections::BTreeSet;

use super::StageContext;
use crate::config::{draft_max_tokens, SECTION_MAX_TOKENS};
use crate::error::WorkflowError;
use crate::llm::{structured_completion, ChatMessage, CompletionParams};
use crate::prompts;
use crate::schema::{Draft, DraftOutline, Paper, ReviewSection};
use crate::verify::citation_indices;
use crate::workflow::state::{SessionState, StateUpdate};

/// Render the indexed paper-context block shared by all Writer prompts.
///
/// Each paper appears as `[i]` with title, year, the first three authors
/// (eliding the rest), the core contribution, and any non-null structured
/// fields; papers without structured data fall back to a 200-char abstract
/// preview.
pub fn build_paper_context(papers: &[&Paper]) -> String {
    let mut blocks: Vec<String> = Vec::with_capacity(papers.len());
    for (i, paper) in papers.iter().enumerate() {
        let mut lines: Vec<String> = Vec::new();
        let year = paper
            .year
            .map_or_else(|| "N/A".to_string(), |y| y.to_string());
        lines.push(format!("[{}] {} (Year: {year})", i + 1, paper.title));

        let shown: Vec<&str> = paper.authors.iter().take(3).map(String::as_str).collect();
        let ellipsis = if paper.authors.len() > 3 { "..." } else { "" };
        lines.push(format!("    Authors: {}{ellipsis}", shown.join(", ")));
        lines.push(format!(
            "    Contribution: {}",
            paper.core_contribution.as_deref().unwrap_or_default()
        ));

        let structured = paper.structured_contribution.as_ref();
        let has_structured = structured.is_some_and(|sc| !sc.is_empty());
        if let (true, Some(sc)) = (has_structured, structured) {
            let fields: [(&str, &Option<String>); 8] = [
                ("Problem", &sc.problem),
                ("Method", &sc.method),
                ("Novelty", &sc.novelty),
                ("Dataset", &sc.dataset),
                ("Baseline", &sc.baseline),
                ("Results", &sc.results),
                ("Limitations", &sc.limitations),
                ("Future Work", &sc.future_work),
            ];
            for (label, value) in fields {
                if let Some(value) = value {
                    lines.push(format!("    {label}: {value}"));
                }
            }
        } else if !paper.abstract_text.is_empty() {
            let preview: String = paper.abstract_text.chars().take(200).collect();
            let ellipsis = if paper.abstract_text.chars().count() > 200 {
                "..."
            } else {
                ""
            };
            lines.push(format!("    Abstract: {preview}{ellipsis}"));
        }

        blocks.push(lines.join("\n"));
    }
    blocks.join("\n\n")
}

async fn generate_outline(
    ctx: &StageContext,
    user_query: &str,
    paper_context: &str,
    language_name: &str,
) -> Result<DraftOutline, WorkflowError> {
    let outline: DraftOutline = structured_completion(
        ctx.llm.as_ref(),
        &ctx.costs,
        vec![
            ChatMessage::system(prompts::outline_system(language_name)),
            ChatMessage::user(prompts::draft_user(user_query, paper_context)),
        ],
        CompletionParams::default(),
    )
    .await?;
    Ok(outline)
}

#[allow(clippy::too_many_arguments)]
async fn generate_section(
    ctx: &StageContext,
    section_title: &str,
    section_num: usize,
    total_sections: usize,
    outline_titles: &[String],
    user_query: &str,
    paper_context: &str,
    language_name: &str,
    num_papers: usize,
) -> Result<ReviewSection, WorkflowError> {
    let section: ReviewSection = structured_completion(
        ctx.llm.as_ref(),
        &ctx.costs,
        vec![
            ChatMessage::system(prompts::section_system(
                section_title,
                section_num,
                total_sections,
                outline_titles,
                language_name,
                num_papers,
            )),
            ChatMessage::user(prompts::draft_user(user_query, paper_context)),
        ],
        CompletionParams {
            temperature: 0.3,
            max_tokens: Some(SECTION_MAX_TOKENS),
        },
    )
    .await?;

    Ok(ReviewSection {
        heading: section_title.to_string(),
        content: section.content,
        cited_paper_ids: Vec::new(),
    })
}

/// Produce the draft. Fails the run on LLM errors; an empty paper set
/// produces no draft and a warning log.
pub async fn execute(
    ctx: &StageContext,
    state: &SessionState,
) -> Result<StateUpdate, WorkflowError> {
    let papers: Vec<&Paper> = state
        .approved_papers
        .iter()
        .filter(|p| p.core_contribution.is_some())
        .collect();

    if papers.is_empty() {
        let log = "No papers with extracted contributions, cannot draft review".to_string();
        tracing::warn!("writer: {log}");
        return Ok(StateUpdate {
            final_draft: Some(None),
            logs: vec![log],
            ..StateUpdate::default()
        });
    }

    let num_papers = papers.len();
    let paper_context = build_paper_context(&papers);
    let language_name = state.output_language.prompt_name();
    let is_retry = state.retry_count > 0 && !state.qa_errors.is_empty();
    let single_shot = is_retry || state.is_continuation;

    let (draft, outline) = if single_shot {
        if is_retry {
            tracing::info!(
                retry = state.retry_count,
                errors = state.qa_errors.len(),
                "writer: retry, fixing QA errors"
            );
        } else {
            tracing::info!(
                request = %state.user_query.chars().take(100).collect::<String>(),
                "writer: continuation, updating draft"
            );
        }

        let mut system = prompts::draft_system(language_name, num_papers);
        if state.is_continuation && !state.messages.is_empty() {
            let context =
                prompts::conversation_context(&state.messages, ctx.limits.max_conversation_turns);
            system.push_str(&prompts::draft_revision_addendum(
                state.final_draft.as_ref(),
                &state.user_query,
                &context,
            ));
        }
        if is_retry {
            let top_errors: Vec<String> = state.qa_errors.iter().take(3).cloned().collect();
            system.push_str(&prompts::draft_retry_addendum(
                state.qa_errors.len(),
                &top_errors,
                num_papers,
            ));
        }

        let draft: Draft = structured_completion(
            ctx.llm.as_ref(),
            &ctx.costs,
            vec![
                ChatMessage::system(system),
                ChatMessage::user(prompts::draft_user(&state.user_query, &paper_context)),
            ],
            CompletionParams {
                temperature: 0.3,
                max_tokens: Some(draft_max_tokens(num_papers)),
            },
        )
        .await?;
        (draft, None)
    } else {
        tracing::info!(
            papers = num_papers,
            language = language_name,
            "writer: generating outline-based review"
        );

        let outline =
            generate_outline(ctx, &state.user_query, &paper_context, language_name).await?;
        tracing::info!(
            title = %outline.title,
            sections = outline.section_titles.len(),
            "writer: outline generated"
        );

        let total = outline.section_titles.len();
        let mut sections: Vec<ReviewSection> = Vec::with_capacity(total);
        for (i, section_title) in outline.section_titles.iter().enumerate() {
            tracing::info!(
                section = i + 1,
                total,
                title = %section_title,
                "writer: generating section"
            );
            let section = generate_section(
                ctx,
                section_title,
                i + 1,
                total,
                &outline.section_titles,
                &state.user_query,
                &paper_context,
                language_name,
                num_papers,
            )
            .await?;
            sections.push(section);
        }

        (
            Draft {
                title: outline.title.clone(),
                sections,
            },
            Some(outline),
        )
    };

    let mut cited: BTreeSet<usize> = BTreeSet::new();
    for section in &draft.sections {
        cited.extend(citation_indices(&section.content));
    }
    let out_of_bounds: Vec<usize> = cited
        .iter()
        .copied()
        .filter(|&idx| idx < 1 || idx > num_papers)
        .collect();
    if !out_of_bounds.is_empty() {
        tracing::warn!(
            indices = ?out_of_bounds,
            valid_range = %format!("1-{num_papers}"),
            "writer: found out-of-bounds citations"
        );
    }

    let mut log = format!(
        "Draft complete: '{}' with {} sections, {} unique citations",
        draft.title,
        draft.sections.len(),
        cited.len()
    );
    if is_retry {
        log.push_str(&format!(" (retry {})", state.retry_count));
    }
    tracing::info!("writer: {log}");

    Ok(StateUpdate {
        final_draft: Some(Some(draft)),
        draft_outline: Some(outline),
        logs: vec![log],
        ..StateUpdate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructuredContribution;
    use crate::testing::{context_with_llm, extracted_paper, routed_llm, state_with_query};

    const OUTLINE_NEEDLE: &str = "section titles";
    const SECTION_NEEDLE: &str = "Write ONLY section";
    const SINGLE_SHOT_NEEDLE: &str = "Write a complete literature review";

    fn state_with_papers(count: usize) -> SessionState {
        let mut state = state_with_query("attention mechanisms");
        state.approved_papers = (0..count)
            .map(|i| extracted_paper(&format!("p{i}"), &format!("Paper {i}")))
            .collect();
        state
    }

    #[test]
    fn paper_context_elides_authors_and_previews_abstract() {
        let mut paper = extracted_paper("p1", "Long Author List");
        paper.authors = vec![
            "A One".to_string(),
            "B Two".to_string(),
            "C Three".to_string(),
            "D Four".to_string(),
        ];
        paper.structured_contribution = None;
        let refs = vec![&paper];
        let context = build_paper_context(&refs);

        assert!(context.contains("[1] Long Author List (Year: 2022)"));
        assert!(context.contains("A One, B Two, C Three..."));
        assert!(!context.contains("D Four"));
        assert!(context.contains("Abstract: Abstract of Long Author List."));
    }

    #[test]
    fn paper_context_prefers_structured_fields() {
        let mut paper = extracted_paper("p1", "Structured Paper");
        paper.structured_contribution = Some(StructuredContribution {
            method: Some("contrastive learning".to_string()),
            results: Some("+4.2 accuracy".to_string()),
            ..Default::default()
        });
        let refs = vec![&paper];
        let context = build_paper_context(&refs);

        assert!(context.contains("Method: contrastive learning"));
        assert!(context.contains("Results: +4.2 accuracy"));
        assert!(!context.contains("Abstract:"));
    }

    #[tokio::test]
    async fn fresh_path_generates_outline_then_sections() {
        let llm = routed_llm(vec![
            (
                OUTLINE_NEEDLE,
                vec![r#"{"title": "A Review", "section_titles": ["Introduction", "Methods"]}"#],
            ),
            (
                SECTION_NEEDLE,
                vec![
                    r#"{"heading": "x", "content": "Intro text {cite:1}."}"#,
                    r#"{"heading": "x", "content": "Methods text {cite:2}."}"#,
                ],
            ),
        ]);
        let ctx = context_with_llm(llm.clone());
        let state = state_with_papers(2);

        let update = execute(&ctx, &state).await.expect("draft");
        let draft = update.final_draft.expect("set").expect("draft");
        assert_eq!(draft.title, "A Review");
        assert_eq!(draft.sections.len(), 2);
        assert_eq!(draft.sections[0].heading, "Introduction");
        assert_eq!(draft.sections[1].heading, "Methods");
        assert!(update.draft_outline.expect("outline field").is_some());
        assert_eq!(llm.calls_matching("Write ONLY section"), 2);
    }

    #[tokio::test]
    async fn retry_uses_single_shot_with_error_addendum() {
        let llm = routed_llm(vec![(
            SINGLE_SHOT_NEEDLE,
            vec![
                r#"{"title": "Fixed", "sections": [{"heading": "All", "content": "{cite:1} {cite:2}"}]}"#,
            ],
        )]);
        let ctx = context_with_llm(llm.clone());
        let mut state = state_with_papers(2);
        state.retry_count = 1;
        state.qa_errors = vec!["Section 1: Hallucinated citation index 5".to_string()];

        let update = execute(&ctx, &state).await.expect("draft");
        let draft = update.final_draft.expect("set").expect("draft");
        assert_eq!(draft.title, "Fixed");
        assert_eq!(llm.call_count(), 1);
        assert_eq!(llm.calls_matching("failed quality checks"), 1);
        assert!(update.logs[0].contains("(retry 1)"));
    }

    #[tokio::test]
    async fn continuation_injects_revision_addendum() {
        let llm = routed_llm(vec![(
            SINGLE_SHOT_NEEDLE,
            vec![r#"{"title": "Revised", "sections": [{"heading": "S", "content": "{cite:1}"}]}"#],
        )]);
        let ctx = context_with_llm(llm.clone());
        let mut state = state_with_papers(1);
        state.is_continuation = true;
        state.final_draft = Some(Draft {
            title: "Original".to_string(),
            sections: vec![ReviewSection {
                heading: "Old Section".to_string(),
                content: "old".to_string(),
                cited_paper_ids: vec![],
            }],
        });

        let update = execute(&ctx, &state).await.expect("draft");
        let draft = update.final_draft.expect("set").expect("draft");
        assert_eq!(draft.title, "Revised");
        assert_eq!(llm.calls_matching("revising an existing review"), 1);
        assert_eq!(llm.calls_matching("Old Section"), 1);
    }

    #[tokio::test]
    async fn no_papers_produces_no_draft() {
        let llm = routed_llm(vec![]);
        let ctx = context_with_llm(llm);
        let state = state_with_query("no papers");

        let update = execute(&ctx, &state).await.expect("stage");
        assert!(update.final_draft.expect("set").is_none());
        assert!(update.logs[0].contains("cannot draft review"));
    }
}
