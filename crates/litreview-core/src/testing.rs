//! Shared test fixtures: a scripted LLM, stage contexts, and state builders.
//!
//! Compiled for unit tests and behind the `test-helpers` feature so
//! downstream crates can drive the engine without a live model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{Limits, ScholarSettings};
use crate::cost::CostTracker;
use crate::error::LlmError;
use crate::llm::{ChatClient, ChatMessage, CompletionParams, LlmResponse, TokenUsage};
use crate::scholar::SourceTracker;
use crate::schema::{ConversationMessage, Language, MessageRole, Paper, PaperSource};
use crate::stages::StageContext;
use crate::workflow::state::SessionState;

/// One routing rule: responses served when the needle appears anywhere in
/// the request. When the queue is down to its last response, that response
/// repeats for further matches.
struct Rule {
    needle: String,
    responses: Mutex<VecDeque<String>>,
}

/// A scripted [`ChatClient`].
///
/// Requests are matched against routing rules by prompt substring; requests
/// matching no rule fall back to a sequential response queue. Every request
/// is recorded for assertions.
pub struct ScriptedChat {
    rules: Vec<Rule>,
    fallback: Mutex<VecDeque<String>>,
    /// Every request seen, in call order.
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    /// Sequential-only script: responses are served in order.
    pub fn sequential(responses: Vec<&str>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Routed script: `(needle, responses)` pairs matched in order.
    pub fn routed(rules: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(needle, responses)| Rule {
                    needle: needle.to_string(),
                    responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                })
                .collect(),
            fallback: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of requests handled so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Number of requests whose prompt contained the needle.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|messages| messages.iter().any(|m| m.content.contains(needle)))
            .count()
    }
}

#[async_trait::async_trait]
impl ChatClient for ScriptedChat {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<LlmResponse, LlmError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(messages.to_vec());

        let combined: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let text = self
            .rules
            .iter()
            .find(|rule| combined.contains(&rule.needle))
            .map(|rule| {
                let mut queue = rule.responses.lock().expect("rule lock");
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or_default()
                } else {
                    queue.front().cloned().unwrap_or_default()
                }
            })
            .or_else(|| self.fallback.lock().expect("fallback lock").pop_front())
            .unwrap_or_default();

        Ok(LlmResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            model: "scripted".to_string(),
        })
    }
}

/// Sequential scripted LLM as a shareable handle.
pub fn scripted_llm(responses: Vec<&str>) -> Arc<ScriptedChat> {
    Arc::new(ScriptedChat::sequential(responses))
}

/// Routed scripted LLM as a shareable handle.
pub fn routed_llm(rules: Vec<(&str, Vec<&str>)>) -> Arc<ScriptedChat> {
    Arc::new(ScriptedChat::routed(rules))
}

/// Stage context with default (unreachable) scholar endpoints.
pub fn context_with_llm(llm: Arc<ScriptedChat>) -> StageContext {
    context_with(llm, ScholarSettings::default())
}

/// Stage context with explicit scholar settings (wiremock bases).
pub fn context_with(llm: Arc<ScriptedChat>, scholar: ScholarSettings) -> StageContext {
    StageContext {
        llm,
        http: reqwest::Client::new(),
        scholar,
        sources: Arc::new(SourceTracker::default()),
        costs: Arc::new(CostTracker::new()),
        limits: Limits::default(),
    }
}

/// Fresh English-language session state for a query.
pub fn state_with_query(query: &str) -> SessionState {
    SessionState::new(
        "test-thread",
        query,
        Language::En,
        vec![PaperSource::SemanticScholar],
        ConversationMessage::now(MessageRole::User, query, "start_research"),
    )
}

/// Minimal paper fixture.
pub fn sample_paper(id: &str, title: &str) -> Paper {
    Paper {
        paper_id: id.to_string(),
        title: title.to_string(),
        authors: vec!["First Author".to_string(), "Second Author".to_string()],
        abstract_text: format!("Abstract of {title}."),
        url: format!("https://example.org/{id}"),
        year: Some(2022),
        doi: None,
        pdf_url: Some(format!("https://example.org/{id}.pdf")),
        is_approved: false,
        core_contribution: None,
        structured_contribution: None,
        source: PaperSource::SemanticScholar,
    }
}

/// Paper fixture that already went through extraction.
pub fn extracted_paper(id: &str, title: &str) -> Paper {
    let mut paper = sample_paper(id, title);
    paper.is_approved = true;
    paper.core_contribution = Some(format!("{title} introduces a new method."));
    paper
}
