//! Session state and the stage-boundary merge.
//!
//! Stages never mutate the state directly; they return a [`StateUpdate`]
//! that the engine merges at the stage boundary. `logs` and `messages` are
//! append-only (concatenation merge); every other field is
//! last-writer-wins.

use serde::{Deserialize, Serialize};

use crate::schema::{
    ClaimVerificationSummary, ConversationMessage, Draft, DraftOutline, Language, Paper,
    PaperSource,
};

/// The durable per-thread state shared by all workflow stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub task_id: String,
    pub user_query: String,
    #[serde(default)]
    pub output_language: Language,
    pub search_sources: Vec<PaperSource>,
    #[serde(default)]
    pub search_keywords: Vec<String>,
    #[serde(default)]
    pub candidate_papers: Vec<Paper>,
    #[serde(default)]
    pub approved_papers: Vec<Paper>,
    #[serde(default)]
    pub final_draft: Option<Draft>,
    #[serde(default)]
    pub draft_outline: Option<DraftOutline>,
    #[serde(default)]
    pub qa_errors: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Append-only across stage boundaries.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Append-only across stage boundaries.
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub is_continuation: bool,
    #[serde(default)]
    pub claim_verification: Option<ClaimVerificationSummary>,
}

impl SessionState {
    /// Initial state for a new session.
    pub fn new(
        task_id: impl Into<String>,
        user_query: impl Into<String>,
        language: Language,
        sources: Vec<PaperSource>,
        initial_message: ConversationMessage,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            user_query: user_query.into(),
            output_language: language,
            search_sources: sources,
            messages: vec![initial_message],
            ..Self::default()
        }
    }

    /// Approved papers among the candidates.
    pub fn approved_candidates(&self) -> Vec<&Paper> {
        self.candidate_papers.iter().filter(|p| p.is_approved).collect()
    }
}

/// Output patch of one stage, merged into the state at the stage boundary.
///
/// `None` fields leave the state untouched; `logs` and `messages` always
/// concatenate.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub user_query: Option<String>,
    pub search_keywords: Option<Vec<String>>,
    pub candidate_papers: Option<Vec<Paper>>,
    pub approved_papers: Option<Vec<Paper>>,
    pub final_draft: Option<Option<Draft>>,
    pub draft_outline: Option<Option<DraftOutline>>,
    pub qa_errors: Option<Vec<String>>,
    pub retry_count: Option<u32>,
    pub is_continuation: Option<bool>,
    pub claim_verification: Option<Option<ClaimVerificationSummary>>,
    pub logs: Vec<String>,
    pub messages: Vec<ConversationMessage>,
}

/// Merge a stage's update into the session state.
pub fn merge(state: &mut SessionState, update: StateUpdate) {
    if let Some(v) = update.user_query {
        state.user_query = v;
    }
    if let Some(v) = update.search_keywords {
        state.search_keywords = v;
    }
    if let Some(v) = update.candidate_papers {
        state.candidate_papers = v;
    }
    if let Some(v) = update.approved_papers {
        state.approved_papers = v;
    }
    if let Some(v) = update.final_draft {
        state.final_draft = v;
    }
    if let Some(v) = update.draft_outline {
        state.draft_outline = v;
    }
    if let Some(v) = update.qa_errors {
        state.qa_errors = v;
    }
    if let Some(v) = update.retry_count {
        state.retry_count = v;
    }
    if let Some(v) = update.is_continuation {
        state.is_continuation = v;
    }
    if let Some(v) = update.claim_verification {
        state.claim_verification = v;
    }
    state.logs.extend(update.logs);
    state.messages.extend(update.messages);
}
