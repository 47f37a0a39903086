//! Litreview HTTP API server.
//!
//! A thin request/response adapter over the core workflow engine: start,
//! approve, continue, status, sessions, and an SSE log stream.

pub mod citations;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router with all API routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health::health))
        // Research workflow
        .route("/research/start", post(routes::research::start))
        .route("/research/approve", post(routes::research::approve))
        .route(
            "/research/continue",
            post(routes::research::continue_research),
        )
        .route(
            "/research/status/{thread_id}",
            get(routes::research::status),
        )
        .route(
            "/research/stream/{thread_id}",
            get(routes::stream::stream_research),
        )
        // Stored sessions
        .route("/research/sessions", get(routes::research::list_sessions))
        .route(
            "/research/sessions/{thread_id}",
            get(routes::research::session_detail),
        )
        // Cost accounting
        .route("/research/costs", get(routes::research::costs));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
