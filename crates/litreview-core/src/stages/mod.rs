//! Workflow stages: typed state transforms over the session state.
//!
//! Each stage reads the current [`SessionState`](crate::workflow::state::SessionState)
//! and returns a [`StateUpdate`](crate::workflow::state::StateUpdate) that the
//! engine merges at the stage boundary. Stages never write state directly and
//! never touch the checkpoint store.

pub mod critic;
pub mod extractor;
pub mod planner;
pub mod retriever;
pub mod writer;

use std::sync::Arc;

use crate::config::{Limits, ScholarSettings};
use crate::cost::CostTracker;
use crate::llm::ChatClient;
use crate::scholar::SourceTracker;

/// Long-lived dependencies injected into every stage.
#[derive(Clone)]
pub struct StageContext {
    /// Shared LLM client.
    pub llm: Arc<dyn ChatClient>,
    /// Shared pooled HTTP client for scholarly and full-text requests.
    pub http: reqwest::Client,
    /// Endpoints and credentials for the external scholarly APIs.
    pub scholar: ScholarSettings,
    /// Per-source failure tracking.
    pub sources: Arc<SourceTracker>,
    /// Token and latency accounting.
    pub costs: Arc<CostTracker>,
    /// Concurrency bounds and QA thresholds.
    pub limits: Limits,
}
