//! Runtime configuration: environment-driven settings and tunable limits.
//!
//! All concurrency bounds and thresholds live in [`Limits`] so higher-tier
//! deployments can raise them without code changes. Secrets and endpoints
//! come from environment variables.

use crate::error::ConfigError;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model when `LLM_MODEL` is unset.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";

/// Settings for the LLM client, read from the environment.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// API key (`LLM_API_KEY`, required).
    pub api_key: String,
    /// Base URL of the chat-completions endpoint (`LLM_BASE_URL`).
    pub base_url: String,
    /// Model name (`LLM_MODEL`).
    pub model: String,
}

impl LlmSettings {
    /// Load from environment variables. Fails when `LLM_API_KEY` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("LLM_API_KEY").map_err(|_| ConfigError::MissingEnv {
            name: "LLM_API_KEY".to_string(),
        })?;
        Ok(Self {
            api_key,
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string()),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
        })
    }
}

/// Endpoints and credentials for the scholarly search and full-text APIs.
///
/// Every base URL is overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct ScholarSettings {
    pub semantic_scholar_base: String,
    pub arxiv_base: String,
    pub pubmed_esearch_base: String,
    pub pubmed_esummary_base: String,
    pub unpaywall_base: String,
    pub openalex_base: String,
    /// `SEMANTIC_SCHOLAR_API_KEY`, sent as `x-api-key` when present.
    pub semantic_scholar_api_key: Option<String>,
    /// `PUBMED_API_KEY`, appended as the `api_key` query parameter.
    pub pubmed_api_key: Option<String>,
    /// `UNPAYWALL_EMAIL`, required by the Unpaywall terms of use.
    pub unpaywall_email: String,
}

impl Default for ScholarSettings {
    fn default() -> Self {
        Self {
            semantic_scholar_base: "https://api.semanticscholar.org/graph/v1".to_string(),
            arxiv_base: "http://export.arxiv.org/api".to_string(),
            pubmed_esearch_base: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi"
                .to_string(),
            pubmed_esummary_base: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi"
                .to_string(),
            unpaywall_base: "https://api.unpaywall.org/v2".to_string(),
            openalex_base: "https://api.openalex.org".to_string(),
            semantic_scholar_api_key: None,
            pubmed_api_key: None,
            unpaywall_email: "litreview@example.com".to_string(),
        }
    }
}

impl ScholarSettings {
    /// Production settings: default endpoints plus credentials from the
    /// environment.
    pub fn from_env() -> Self {
        Self {
            semantic_scholar_api_key: std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok(),
            pubmed_api_key: std::env::var("PUBMED_API_KEY").ok(),
            unpaywall_email: std::env::var("UNPAYWALL_EMAIL")
                .unwrap_or_else(|_| "litreview@example.com".to_string()),
            ..Self::default()
        }
    }
}

/// Process-wide tunables: fan-out bounds, retry caps, QA thresholds.
///
/// The defaults are sized for free-tier rate limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Concurrent LLM calls during extraction and claim verification.
    pub llm_concurrency: usize,
    /// Concurrent full-text resolver lookups.
    pub fulltext_concurrency: usize,
    /// Concurrent claim-verification LLM calls.
    pub claim_verification_concurrency: usize,
    /// Whether the semantic QA layer runs at all.
    pub claim_verification_enabled: bool,
    /// Minimum entails/total ratio for the semantic QA layer to pass.
    pub min_entailment_ratio: f64,
    /// Maximum Writer re-entries on QA failure.
    pub max_retry_count: u32,
    /// Keyword list is truncated to this many entries.
    pub max_keywords: usize,
    /// Results requested per keyword per source.
    pub papers_per_query: usize,
    /// Conversation context window, in user/assistant turn pairs.
    pub max_conversation_turns: usize,
    /// Failures within the window before a source is skipped.
    pub source_skip_threshold: usize,
    /// Seconds a recorded failure stays relevant.
    pub source_skip_window_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            llm_concurrency: 2,
            fulltext_concurrency: 3,
            claim_verification_concurrency: 2,
            claim_verification_enabled: true,
            min_entailment_ratio: 0.8,
            max_retry_count: 3,
            max_keywords: 5,
            papers_per_query: 10,
            max_conversation_turns: 5,
            source_skip_threshold: 3,
            source_skip_window_secs: 120,
        }
    }
}

/// Token budget for a single-shot draft: grows with paper count, capped.
pub fn draft_max_tokens(num_papers: usize) -> u32 {
    let scaled = 2000 + 200 * num_papers as u32;
    scaled.min(8000)
}

/// Token budget for one section in the outline-based path.
pub const SECTION_MAX_TOKENS: u32 = 1500;
