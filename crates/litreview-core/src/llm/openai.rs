//! OpenAI-compatible chat-completions client.
//!
//! Works with OpenAI and any endpoint speaking the same request/response
//! format. Transient network failures (connect errors, timeouts) are retried
//! with exponential backoff; API errors are surfaced to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ChatClient, ChatMessage, CompletionParams, LlmResponse, TokenUsage};
use crate::config::LlmSettings;
use crate::error::LlmError;

/// Connection timeout for the LLM endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Total request timeout; completions can be slow.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum attempts per completion, counting the first.
const MAX_ATTEMPTS: u32 = 3;

/// Backoff cap between attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatClient {
    /// Build a client from settings. The client keeps its own connection
    /// pool with longer read timeouts than the scholarly HTTP client.
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url,
            api_key: settings.api_key,
            model: settings.model,
        })
    }

    /// Sleep duration before retry `attempt` (1-based): 2s, 4s, 8s, capped.
    fn backoff_duration(attempt: u32) -> Duration {
        Duration::from_secs(1u64 << attempt).min(MAX_BACKOFF)
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<LlmResponse, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            response_format: ResponseFormat { format_type: "json_object" },
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(LlmError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: body,
            });
        }

        let body: ChatCompletionResponse = response.json().await.map_err(LlmError::Request)?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens.unwrap_or(0),
            completion_tokens: u.completion_tokens.unwrap_or(0),
        });

        Ok(LlmResponse {
            text,
            usage,
            model: if body.model.is_empty() {
                self.model.clone()
            } else {
                body.model
            },
        })
    }
}

#[async_trait::async_trait]
impl ChatClient for OpenAiChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<LlmResponse, LlmError> {
        let mut attempt = 1;
        loop {
            tracing::debug!(
                model = %self.model,
                attempt,
                max_tokens = ?params.max_tokens,
                temperature = params.temperature,
                "LLM request"
            );

            match self.send_once(messages, params).await {
                Ok(response) => {
                    tracing::debug!(
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        chars = response.text.len(),
                        "LLM response"
                    );
                    return Ok(response);
                }
                Err(LlmError::Request(e))
                    if attempt < MAX_ATTEMPTS && (e.is_timeout() || e.is_connect()) =>
                {
                    let wait = Self::backoff_duration(attempt);
                    tracing::warn!(
                        attempt,
                        wait_secs = wait.as_secs(),
                        error = %e,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    response_format: ResponseFormat,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}
