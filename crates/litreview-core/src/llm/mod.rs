//! LLM client abstraction: chat completions with JSON-object output.
//!
//! [`ChatClient`] is the object-safe seam; [`OpenAiChatClient`] is the
//! production implementation. The typed entry point used by all workflow
//! stages is [`structured::structured_completion`], which layers JSON-schema
//! coercion and validation on top of a raw completion.

pub mod openai;
pub mod structured;

pub use openai::OpenAiChatClient;
pub use structured::structured_completion;

use crate::error::LlmError;
use crate::schema::MessageRole;

/// Token usage information from an LLM completion.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    pub prompt_tokens: u32,
    /// Number of tokens in the output/completion.
    pub completion_tokens: u32,
}

/// A single chat message sent to the model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one completion request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    /// Sampling temperature. Stages default to 0.3; the claim verifier
    /// uses 0.1.
    pub temperature: f32,
    /// Completion token cap, when the caller wants one.
    pub max_tokens: Option<u32>,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: None,
        }
    }
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The raw completion text (expected to be a JSON object).
    pub text: String,
    pub usage: TokenUsage,
    /// The model that produced this response.
    pub model: String,
}

/// Trait abstracting the chat-completions provider.
///
/// Object-safe so stages can share one `Arc<dyn ChatClient>`.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    /// The configured model name.
    fn model(&self) -> &str;

    /// Request a completion in JSON-object mode.
    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<LlmResponse, LlmError>;
}
