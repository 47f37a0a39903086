/// Core library for the litreview automated literature review engine.
///
/// This crate contains all business logic: the workflow engine and its
/// checkpoint store, the scholarly search clients, the LLM client with
/// schema-coerced JSON completions, citation QA, the debounced streaming
/// queue, and the shared domain types. The HTTP surface lives in the
/// companion server crate.
pub mod config;
pub mod cost;
pub mod error;
pub mod fulltext;
pub mod llm;
pub mod net;
pub mod prompts;
pub mod schema;
pub mod scholar;
pub mod stages;
pub mod stream;
pub mod verify;
pub mod workflow;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use error::*;

/// Returns the version of the litreview-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
