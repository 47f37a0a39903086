//! Planner stage: expand the user query into search keywords.

use schemars::JsonSchema;
use serde::Deserialize;

use super::StageContext;
use crate::error::WorkflowError;
use crate::llm::{structured_completion, ChatMessage, CompletionParams};
use crate::prompts;
use crate::workflow::state::{SessionState, StateUpdate};

#[derive(Debug, Deserialize, JsonSchema)]
struct KeywordPlan {
    keywords: Vec<String>,
}

/// Generate 3-5 search keywords from the user query. On a continuation the
/// recent conversation is injected as context. LLM failure fails the run.
pub async fn execute(
    ctx: &StageContext,
    state: &SessionState,
) -> Result<StateUpdate, WorkflowError> {
    tracing::info!(
        query = %state.user_query,
        continuation = state.is_continuation,
        "planner: decomposing query"
    );

    let mut system = prompts::KEYWORD_SYSTEM.to_string();
    if state.is_continuation && !state.messages.is_empty() {
        let context =
            prompts::conversation_context(&state.messages, ctx.limits.max_conversation_turns);
        system.push_str(&prompts::keyword_continuation_addendum(&context));
    }

    let plan: KeywordPlan = structured_completion(
        ctx.llm.as_ref(),
        &ctx.costs,
        vec![
            ChatMessage::system(system),
            ChatMessage::user(state.user_query.clone()),
        ],
        CompletionParams::default(),
    )
    .await?;

    let mut keywords = plan.keywords;
    keywords.truncate(ctx.limits.max_keywords);

    let log = format!(
        "Generated {} search keywords: {:?}",
        keywords.len(),
        keywords
    );
    tracing::info!("planner: {log}");

    Ok(StateUpdate {
        search_keywords: Some(keywords),
        logs: vec![log],
        ..StateUpdate::default()
    })
}
