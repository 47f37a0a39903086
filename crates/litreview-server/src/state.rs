//! Shared application state for the litreview server.

use litreview_core::workflow::Workflow;

/// Shared state accessible by all route handlers.
pub struct AppState {
    /// The workflow engine; owns the checkpoint store and all clients.
    pub engine: Workflow,
}
