//! Research workflow endpoints: start, approve, continue, status, sessions.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use litreview_core::schema::{ConversationMessage, Draft, Language, Paper, PaperSource};
use litreview_core::workflow::{SessionDetail, SessionSummary, StatusReport};

use crate::citations::finalize_citations;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for `POST /api/research/start`.
#[derive(Deserialize)]
pub struct StartRequest {
    pub query: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub sources: Vec<PaperSource>,
}

/// Response for `POST /api/research/start`.
#[derive(Serialize)]
pub struct StartResponse {
    pub thread_id: String,
    pub candidate_papers: Vec<Paper>,
    pub logs: Vec<String>,
}

/// `POST /api/research/start` — run Planner and Retriever, pause at the
/// approval interrupt, and return the candidate set.
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let thread_id = Uuid::new_v4().to_string();
    tracing::info!(thread_id, query = %req.query, "Starting research");

    let outcome = state
        .engine
        .start(&thread_id, &req.query, req.language, req.sources)
        .await?;

    Ok(Json(StartResponse {
        thread_id: outcome.thread_id,
        candidate_papers: outcome.candidate_papers,
        logs: outcome.logs,
    }))
}

/// Request body for `POST /api/research/approve`.
#[derive(Deserialize)]
pub struct ApproveRequest {
    pub thread_id: String,
    pub paper_ids: Vec<String>,
}

/// Response for `POST /api/research/approve`.
#[derive(Serialize)]
pub struct ApproveResponse {
    pub thread_id: String,
    pub final_draft: Option<Draft>,
    pub approved_count: usize,
    pub logs: Vec<String>,
}

/// `POST /api/research/approve` — mark the selected candidates approved and
/// run the workflow to termination. The returned draft has `{cite:N}`
/// rewritten to `[N]` with per-section `cited_paper_ids`.
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApproveResponse>, ApiError> {
    let outcome = state.engine.approve(&req.thread_id, &req.paper_ids).await?;

    let mut final_draft = outcome.final_draft;
    if let Some(draft) = &mut final_draft {
        finalize_citations(draft, &outcome.approved_papers);
    }

    Ok(Json(ApproveResponse {
        thread_id: outcome.thread_id,
        final_draft,
        approved_count: outcome.approved_count,
        logs: outcome.new_logs,
    }))
}

/// Request body for `POST /api/research/continue`.
#[derive(Deserialize)]
pub struct ContinueRequest {
    pub thread_id: String,
    pub message: String,
}

/// Response for `POST /api/research/continue`.
#[derive(Serialize)]
pub struct ContinueResponse {
    pub thread_id: String,
    pub message: ConversationMessage,
    pub final_draft: Option<Draft>,
    pub candidate_papers: Vec<Paper>,
    pub logs: Vec<String>,
}

/// `POST /api/research/continue` — revise an existing draft from a
/// follow-up message.
pub async fn continue_research(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ContinueRequest>,
) -> Result<Json<ContinueResponse>, ApiError> {
    let outcome = state
        .engine
        .continue_session(&req.thread_id, &req.message)
        .await?;

    let approved: Vec<Paper> = outcome
        .candidate_papers
        .iter()
        .filter(|p| p.is_approved)
        .cloned()
        .collect();
    let mut final_draft = outcome.final_draft;
    if let Some(draft) = &mut final_draft {
        finalize_citations(draft, &approved);
    }

    Ok(Json(ContinueResponse {
        thread_id: outcome.thread_id,
        message: outcome.assistant_message,
        final_draft,
        candidate_papers: outcome.candidate_papers,
        logs: outcome.new_logs,
    }))
}

/// `GET /api/research/status/{thread_id}` — stored session status.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    let report = state.engine.status(&thread_id).await?;
    Ok(Json(report))
}

/// Query parameters for the sessions listing.
#[derive(Deserialize)]
pub struct SessionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /api/research/sessions?limit=50` — session summaries.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionsQuery>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let limit = params.limit.min(100);
    let sessions = state.engine.list_sessions(limit).await?;
    Ok(Json(sessions))
}

/// `GET /api/research/sessions/{thread_id}` — full session detail.
pub async fn session_detail(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let detail = state.engine.session_detail(&thread_id).await?;
    Ok(Json(detail))
}

/// `GET /api/research/costs` — LLM usage and per-stage timing summary.
pub async fn costs(
    State(state): State<Arc<AppState>>,
) -> Json<litreview_core::cost::CostSummary> {
    Json(state.engine.context().costs.summary())
}
