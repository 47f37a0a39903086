//! Failure tracking for scholarly sources.
//!
//! Tracks recent failures per source and reports when a source should be
//! skipped. Not a full circuit breaker, just failure counting over a sliding
//! window, local to the process.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-source failure history with a sliding window.
#[derive(Debug)]
pub struct SourceTracker {
    window: Duration,
    threshold: usize,
    failures: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SourceTracker {
    /// Create a tracker with the given window and failure threshold.
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// True when the source accumulated `threshold` failures inside the
    /// window. Expired entries are pruned as a side effect.
    pub fn should_skip(&self, source: &str) -> bool {
        let now = Instant::now();
        let mut failures = self.failures.lock().expect("source tracker lock poisoned");
        let recent = failures.entry(source.to_string()).or_default();
        recent.retain(|t| now.duration_since(*t) < self.window);
        recent.len() >= self.threshold
    }

    /// Record a failure for the given source.
    pub fn record_failure(&self, source: &str) {
        let mut failures = self.failures.lock().expect("source tracker lock poisoned");
        failures
            .entry(source.to_string())
            .or_default()
            .push(Instant::now());
    }

    /// Clear failure history on success.
    pub fn record_success(&self, source: &str) {
        let mut failures = self.failures.lock().expect("source tracker lock poisoned");
        failures.remove(source);
    }

    /// Reset all failure tracking. Useful for tests.
    pub fn reset(&self) {
        let mut failures = self.failures.lock().expect("source tracker lock poisoned");
        failures.clear();
    }
}

impl Default for SourceTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_after_threshold_failures() {
        let tracker = SourceTracker::new(Duration::from_secs(120), 3);
        assert!(!tracker.should_skip("arxiv"));

        tracker.record_failure("arxiv");
        tracker.record_failure("arxiv");
        assert!(!tracker.should_skip("arxiv"));

        tracker.record_failure("arxiv");
        assert!(tracker.should_skip("arxiv"));
    }

    #[test]
    fn failures_are_per_source() {
        let tracker = SourceTracker::new(Duration::from_secs(120), 3);
        for _ in 0..3 {
            tracker.record_failure("arxiv");
        }
        assert!(tracker.should_skip("arxiv"));
        assert!(!tracker.should_skip("pubmed"));
    }

    #[test]
    fn success_clears_history() {
        let tracker = SourceTracker::new(Duration::from_secs(120), 3);
        for _ in 0..3 {
            tracker.record_failure("semantic_scholar");
        }
        assert!(tracker.should_skip("semantic_scholar"));

        tracker.record_success("semantic_scholar");
        assert!(!tracker.should_skip("semantic_scholar"));
    }

    #[test]
    fn old_failures_expire() {
        let tracker = SourceTracker::new(Duration::from_millis(10), 3);
        for _ in 0..3 {
            tracker.record_failure("arxiv");
        }
        assert!(tracker.should_skip("arxiv"));

        std::thread::sleep(Duration::from_millis(20));
        assert!(!tracker.should_skip("arxiv"));
    }

    #[test]
    fn reset_clears_all_sources() {
        let tracker = SourceTracker::new(Duration::from_secs(120), 1);
        tracker.record_failure("arxiv");
        tracker.record_failure("pubmed");
        tracker.reset();
        assert!(!tracker.should_skip("arxiv"));
        assert!(!tracker.should_skip("pubmed"));
    }
}
