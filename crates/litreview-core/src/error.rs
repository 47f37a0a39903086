//! Error types for the litreview core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors related to configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is absent.
    #[error("missing required environment variable: {name}")]
    MissingEnv {
        /// The name of the missing variable.
        name: String,
    },

    /// A configuration value is unacceptable.
    #[error("invalid value for '{name}': {message}")]
    InvalidValue {
        /// The name of the invalid setting.
        name: String,
        /// A description of why the value is invalid.
        message: String,
    },
}

/// Errors from the scholarly search sources (Semantic Scholar, arXiv, PubMed).
#[derive(Debug, thiserror::Error)]
pub enum ScholarError {
    /// The source returned HTTP 429 (rate limited).
    #[error("{src} rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Which source rate-limited us.
        src: &'static str,
        /// Seconds the source asked us to wait.
        retry_after_secs: u64,
    },

    /// The source returned a non-success status.
    #[error("{src} API error (HTTP {status}): {message}")]
    Api {
        /// Which source failed.
        src: &'static str,
        /// The HTTP status code.
        status: u16,
        /// The error body from the source.
        message: String,
    },

    /// Network-level failure reaching the source.
    #[error("{src} network error: {error}")]
    Network {
        /// Which source failed.
        src: &'static str,
        /// The underlying HTTP client error.
        #[source]
        error: reqwest::Error,
    },

    /// The response body did not match the expected JSON/XML shape.
    #[error("{src} returned an unexpected response shape: {message}")]
    Decode {
        /// Which source failed.
        src: &'static str,
        /// Details of the decode failure.
        message: String,
    },
}

impl ScholarError {
    /// Name of the source this error originated from.
    pub fn source_name(&self) -> &'static str {
        match self {
            Self::RateLimited { src, .. }
            | Self::Api { src, .. }
            | Self::Network { src, .. }
            | Self::Decode { src, .. } => src,
        }
    }
}

/// Errors from the full-text resolution chain (Unpaywall, OpenAlex).
#[derive(Debug, thiserror::Error)]
pub enum FulltextError {
    /// Network-level failure reaching a resolver.
    #[error("full-text resolver network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A resolver returned a retryable rate-limit response.
    #[error("full-text resolver rate limited")]
    RateLimited,
}

/// Errors from the LLM client and structured-completion layer.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP request to the LLM endpoint failed.
    #[error("LLM HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// LLM API returned an error response.
    #[error("LLM API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// LLM provider rate limit hit.
    #[error("LLM rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The model produced an empty completion.
    #[error("LLM returned empty response")]
    EmptyResponse,

    /// The model echoed the JSON schema instead of filling it in.
    #[error("LLM returned the JSON schema instead of actual content")]
    SchemaEcho,

    /// The completion was not valid JSON.
    #[error("LLM returned invalid JSON{truncation_hint}: {message}")]
    Parse {
        /// The JSON parse error.
        message: String,
        /// Set to a hint string when the output looks truncated.
        truncation_hint: String,
    },

    /// The completion parsed as JSON but did not match the target type.
    #[error("LLM output does not match {type_name}: {message}")]
    Validation {
        /// The Rust type the output was validated against.
        type_name: &'static str,
        /// The deserialization error.
        message: String,
    },

    /// No LLM client configured.
    #[error("no LLM client configured")]
    NotConfigured,
}

/// Errors from the SQLite checkpoint store.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Failed to connect to the SQLite database.
    #[error("checkpoint store connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("checkpoint store migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A query against the store failed.
    #[error("checkpoint store query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Session state could not be serialized or deserialized.
    #[error("checkpoint state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from workflow execution and the resume protocol.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Checkpoint store failure.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// LLM failure that is fatal for the current stage.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// No session exists for the given thread id.
    #[error("thread {thread_id} not found")]
    UnknownThread {
        /// The thread id that was looked up.
        thread_id: String,
    },

    /// The session is not paused at the approval interrupt.
    #[error("thread {thread_id} is not waiting for approval (next: {next:?})")]
    NotAwaitingApproval {
        /// The thread id.
        thread_id: String,
        /// The stages the session would run next.
        next: Vec<String>,
    },

    /// None of the supplied paper ids matched a candidate.
    #[error("none of the provided paper ids match candidate papers")]
    NoMatchingPapers,

    /// A continuation was requested before any draft exists.
    #[error("cannot continue: no draft exists yet")]
    NoDraftYet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_env_message() {
        let err = ConfigError::MissingEnv {
            name: "LLM_API_KEY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing required environment variable: LLM_API_KEY"
        );
    }

    #[test]
    fn scholar_error_rate_limited_message() {
        let err = ScholarError::RateLimited {
            src: "semantic_scholar",
            retry_after_secs: 3,
        };
        assert_eq!(
            err.to_string(),
            "semantic_scholar rate limited, retry after 3s"
        );
        assert_eq!(err.source_name(), "semantic_scholar");
    }

    #[test]
    fn scholar_error_api_message() {
        let err = ScholarError::Api {
            src: "pubmed",
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "pubmed API error (HTTP 500): boom");
    }

    #[test]
    fn llm_error_empty_response_message() {
        assert_eq!(LlmError::EmptyResponse.to_string(), "LLM returned empty response");
    }

    #[test]
    fn llm_error_schema_echo_message() {
        assert_eq!(
            LlmError::SchemaEcho.to_string(),
            "LLM returned the JSON schema instead of actual content"
        );
    }

    #[test]
    fn llm_error_parse_with_truncation_hint() {
        let err = LlmError::Parse {
            message: "EOF while parsing".to_string(),
            truncation_hint: " (output likely truncated)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "LLM returned invalid JSON (output likely truncated): EOF while parsing"
        );
    }

    #[test]
    fn workflow_error_unknown_thread_message() {
        let err = WorkflowError::UnknownThread {
            thread_id: "t-1".to_string(),
        };
        assert_eq!(err.to_string(), "thread t-1 not found");
    }

    #[test]
    fn workflow_error_no_matching_papers_message() {
        assert_eq!(
            WorkflowError::NoMatchingPapers.to_string(),
            "none of the provided paper ids match candidate papers"
        );
    }

    #[test]
    fn workflow_error_no_draft_message() {
        assert_eq!(
            WorkflowError::NoDraftYet.to_string(),
            "cannot continue: no draft exists yet"
        );
    }
}
