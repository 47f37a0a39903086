//! API error types for the litreview server.
//!
//! Maps core workflow errors to HTTP status codes and JSON error bodies of
//! the form `{"detail": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use litreview_core::error::WorkflowError;
use serde_json::json;

/// API error type for route handlers.
pub enum ApiError {
    /// Requested thread or resource not found.
    NotFound(String),
    /// The request is invalid for the session's current state.
    BadRequest(String),
    /// Internal engine or storage failure.
    Internal(String),
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::UnknownThread { .. } => Self::NotFound(err.to_string()),
            WorkflowError::NotAwaitingApproval { .. }
            | WorkflowError::NoMatchingPapers
            | WorkflowError::NoDraftYet => Self::BadRequest(err.to_string()),
            WorkflowError::Checkpoint(_) | WorkflowError::Llm(_) => {
                tracing::error!("workflow error: {err}");
                Self::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = axum::Json(json!({ "detail": detail }));
        (status, body).into_response()
    }
}
