//! In-memory cost accounting: LLM token usage and per-stage latency.
//!
//! The tracker is a long-lived singleton constructed at startup and injected
//! into the LLM client and the workflow engine. Writes are infrequent, so a
//! plain mutex is enough.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

/// One recorded LLM call.
#[derive(Debug, Clone, Serialize)]
pub struct LlmUsageRecord {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: f64,
}

/// Aggregate view over everything recorded so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSummary {
    pub llm_calls: usize,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    /// Calls grouped by model name.
    pub calls_by_model: BTreeMap<String, usize>,
    /// Wall-clock milliseconds per stage, one entry per execution
    /// (retries append, they never overwrite).
    pub stage_timings_ms: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Default)]
struct CostInner {
    llm_calls: Vec<LlmUsageRecord>,
    stage_timings_ms: BTreeMap<String, Vec<f64>>,
}

/// Process-global cost tracker.
#[derive(Debug, Default)]
pub struct CostTracker {
    inner: Mutex<CostInner>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record token usage and latency for one LLM call.
    pub fn record_llm_usage(
        &self,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        latency_ms: f64,
    ) {
        let mut inner = self.inner.lock().expect("cost tracker lock poisoned");
        inner.llm_calls.push(LlmUsageRecord {
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            latency_ms,
        });
    }

    /// Record the wall-clock latency of one stage execution.
    pub fn record_stage_latency(&self, stage: &str, latency_ms: f64) {
        let mut inner = self.inner.lock().expect("cost tracker lock poisoned");
        inner
            .stage_timings_ms
            .entry(stage.to_string())
            .or_default()
            .push(latency_ms);
    }

    /// Snapshot of everything recorded so far.
    pub fn summary(&self) -> CostSummary {
        let inner = self.inner.lock().expect("cost tracker lock poisoned");
        let mut calls_by_model: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_prompt: u64 = 0;
        let mut total_completion: u64 = 0;
        for call in &inner.llm_calls {
            *calls_by_model.entry(call.model.clone()).or_default() += 1;
            total_prompt += u64::from(call.prompt_tokens);
            total_completion += u64::from(call.completion_tokens);
        }
        CostSummary {
            llm_calls: inner.llm_calls.len(),
            total_prompt_tokens: total_prompt,
            total_completion_tokens: total_completion,
            calls_by_model,
            stage_timings_ms: inner.stage_timings_ms.clone(),
        }
    }

    /// Clear all recorded data. Useful for tests.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("cost tracker lock poisoned");
        inner.llm_calls.clear();
        inner.stage_timings_ms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_llm_usage() {
        let tracker = CostTracker::new();
        tracker.record_llm_usage("gpt-4o", 100, 50, 1200.0);
        tracker.record_llm_usage("gpt-4o", 200, 80, 900.0);

        let summary = tracker.summary();
        assert_eq!(summary.llm_calls, 2);
        assert_eq!(summary.total_prompt_tokens, 300);
        assert_eq!(summary.total_completion_tokens, 130);
        assert_eq!(summary.calls_by_model["gpt-4o"], 2);
    }

    #[test]
    fn stage_timings_append_across_retries() {
        let tracker = CostTracker::new();
        tracker.record_stage_latency("writer", 10.0);
        tracker.record_stage_latency("writer", 20.0);

        let summary = tracker.summary();
        assert_eq!(summary.stage_timings_ms["writer"], vec![10.0, 20.0]);
    }

    #[test]
    fn reset_clears_everything() {
        let tracker = CostTracker::new();
        tracker.record_llm_usage("gpt-4o", 1, 1, 1.0);
        tracker.record_stage_latency("planner", 5.0);
        tracker.reset();

        let summary = tracker.summary();
        assert_eq!(summary.llm_calls, 0);
        assert!(summary.stage_timings_ms.is_empty());
    }
}
