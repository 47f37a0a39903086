//! Shared domain types: papers, drafts, claims, and conversation messages.
//!
//! Everything here is serde-serializable because the whole session state is
//! checkpointed as JSON between workflow stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scholarly data sources a paper can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSource {
    SemanticScholar,
    Arxiv,
    Pubmed,
}

impl PaperSource {
    /// Stable key used for failure tracking and logging.
    pub fn key(self) -> &'static str {
        match self {
            Self::SemanticScholar => "semantic_scholar",
            Self::Arxiv => "arxiv",
            Self::Pubmed => "pubmed",
        }
    }

    /// Human-readable display name for log lines.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::SemanticScholar => "Semantic Scholar",
            Self::Arxiv => "arXiv",
            Self::Pubmed => "PubMed",
        }
    }
}

/// Output language for the generated review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    /// Name used inside LLM prompts.
    pub fn prompt_name(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Zh => "Chinese",
        }
    }
}

/// 8-dimension structured extraction from a paper abstract.
///
/// All fields are optional since not all papers contain all information;
/// theoretical papers may have no dataset or baseline, for example.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredContribution {
    /// Research problem being addressed.
    pub problem: Option<String>,
    /// Methodology or approach used.
    pub method: Option<String>,
    /// Key innovations or contributions.
    pub novelty: Option<String>,
    /// Datasets used for experiments.
    pub dataset: Option<String>,
    /// Baseline methods compared against.
    pub baseline: Option<String>,
    /// Key experimental results or findings.
    pub results: Option<String>,
    /// Limitations acknowledged by the authors.
    pub limitations: Option<String>,
    /// Future directions suggested.
    pub future_work: Option<String>,
}

impl StructuredContribution {
    /// True when no field carries any content.
    pub fn is_empty(&self) -> bool {
        self.problem.is_none()
            && self.method.is_none()
            && self.novelty.is_none()
            && self.dataset.is_none()
            && self.baseline.is_none()
            && self.results.is_none()
            && self.limitations.is_none()
            && self.future_work.is_none()
    }
}

/// Metadata for a single candidate or approved paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Source-prefixed opaque identifier, unique within a session.
    pub paper_id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub pdf_url: Option<String>,
    /// Set by the user at the approval interrupt.
    #[serde(default)]
    pub is_approved: bool,
    /// One-sentence contribution summary extracted by the LLM.
    #[serde(default)]
    pub core_contribution: Option<String>,
    /// 8-field structured summary extracted by the LLM.
    #[serde(default)]
    pub structured_contribution: Option<StructuredContribution>,
    pub source: PaperSource,
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single message in the per-session conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ConversationMessage {
    /// Build a message stamped with the current time and an action tag.
    pub fn now(role: MessageRole, content: impl Into<String>, action: &str) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Some(serde_json::json!({ "action": action })),
        }
    }
}

/// One section of the generated review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ReviewSection {
    pub heading: String,
    /// Body text containing `{cite:N}` markers until the adapter rewrites them.
    pub content: String,
    /// Populated by the request adapter after final assembly.
    #[serde(default)]
    pub cited_paper_ids: Vec<String>,
}

/// Outline produced by the first Writer phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DraftOutline {
    pub title: String,
    pub section_titles: Vec<String>,
}

/// The full generated review draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Draft {
    pub title: String,
    pub sections: Vec<ReviewSection>,
}

/// Three-way entailment labels for claim verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntailmentLabel {
    /// The cited paper supports the claim.
    Entails,
    /// The cited paper does not provide enough evidence.
    Insufficient,
    /// The cited paper contradicts the claim.
    Contradicts,
}

impl EntailmentLabel {
    /// Map a free-form model label; unknown labels default to `Insufficient`.
    pub fn from_model_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "entails" => Self::Entails,
            "contradicts" => Self::Contradicts,
            _ => Self::Insufficient,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entails => "entails",
            Self::Insufficient => "insufficient",
            Self::Contradicts => "contradicts",
        }
    }
}

/// An atomic claim extracted from the review text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Identifier of the form `s{section}_c{index}`.
    pub claim_id: String,
    /// Claim text, preserving its original `{cite:N}` markers.
    pub text: String,
    pub section_index: usize,
    /// 1-based paper indices cited by this claim.
    pub citation_indices: Vec<usize>,
}

/// Result of verifying a single (claim, cited paper) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimVerification {
    pub claim_id: String,
    pub claim_text: String,
    /// The 1-based paper index being verified.
    pub citation_index: usize,
    pub paper_title: String,
    pub label: EntailmentLabel,
    /// Clamped to [0, 1].
    pub confidence: f64,
    /// Relevant snippet from the paper, truncated to 500 chars.
    pub evidence_snippet: String,
    /// Brief explanation of the verdict, truncated to 200 chars.
    pub rationale: String,
}

/// Summary of all claim verifications for a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimVerificationSummary {
    pub total_claims: usize,
    pub total_verifications: usize,
    pub entails_count: usize,
    pub insufficient_count: usize,
    pub contradicts_count: usize,
    #[serde(default)]
    pub failed_verifications: Vec<ClaimVerification>,
}
