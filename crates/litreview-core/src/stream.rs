//! Debounced streaming queue for SSE transport.
//!
//! Merges a stream of small string tokens into larger chunks. Two flush
//! triggers: a semantic boundary inside the token (sentence punctuation or
//! newline) flushes immediately; a 200 ms background timer flushes whatever
//! accumulated. Closing cancels the timer, flushes the residue, and enqueues
//! a sentinel the consumer stops on.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Timer flush interval.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Characters that trigger an immediate flush.
const SEMANTIC_BOUNDARIES: [char; 7] = ['。', '！', '？', '.', '!', '?', '\n'];

/// Queue statistics.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct QueueStats {
    pub total_tokens: u64,
    pub total_flushes: u64,
    /// tokens per flush; 0.0 before the first flush.
    pub compression_ratio: f64,
}

#[derive(Debug, Default)]
struct QueueState {
    buffer: String,
    closed: bool,
    total_tokens: u64,
    total_flushes: u64,
}

/// Producer half of the debounced queue.
pub struct StreamingEventQueue {
    state: Arc<Mutex<QueueState>>,
    tx: mpsc::UnboundedSender<Option<String>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

/// Consumer half; yields merged chunks until the queue is closed.
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<Option<String>>,
}

impl QueueConsumer {
    /// Next merged chunk, or `None` once the queue is closed and drained.
    pub async fn next_chunk(&mut self) -> Option<String> {
        match self.rx.recv().await {
            Some(Some(chunk)) => Some(chunk),
            _ => None,
        }
    }
}

impl StreamingEventQueue {
    /// Create a queue and its consumer.
    pub fn new() -> (Self, QueueConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(QueueState::default())),
                tx,
                flush_task: Mutex::new(None),
            },
            QueueConsumer { rx },
        )
    }

    /// Start the background flush timer. Idempotent.
    pub fn start(&self) {
        let mut task = self.flush_task.lock().expect("queue lock poisoned");
        if task.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        let tx = self.tx.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let mut state = state.lock().expect("queue lock poisoned");
                if state.closed {
                    break;
                }
                flush_locked(&mut state, &tx);
            }
        }));
    }

    /// Push one token. Tokens containing a semantic boundary flush the
    /// buffer immediately. Pushes after close are ignored.
    pub fn push(&self, token: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.closed {
            return;
        }
        state.buffer.push_str(token);
        state.total_tokens += 1;

        if token.chars().any(|c| SEMANTIC_BOUNDARIES.contains(&c)) {
            flush_locked(&mut state, &self.tx);
        }
    }

    /// Close the queue: cancel the timer, flush the residual buffer, and
    /// enqueue the sentinel. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
            flush_locked(&mut state, &self.tx);
        }

        if let Some(task) = self.flush_task.lock().expect("queue lock poisoned").take() {
            task.abort();
        }

        let _ = self.tx.send(None);
    }

    /// Queue statistics: total tokens, total flushes, compression ratio.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().expect("queue lock poisoned");
        QueueStats {
            total_tokens: state.total_tokens,
            total_flushes: state.total_flushes,
            compression_ratio: if state.total_flushes > 0 {
                #[allow(clippy::cast_precision_loss)]
                let ratio = state.total_tokens as f64 / state.total_flushes as f64;
                (ratio * 100.0).round() / 100.0
            } else {
                0.0
            },
        }
    }
}

impl Drop for StreamingEventQueue {
    fn drop(&mut self) {
        if let Ok(mut task) = self.flush_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

fn flush_locked(state: &mut QueueState, tx: &mpsc::UnboundedSender<Option<String>>) {
    if state.buffer.is_empty() {
        return;
    }
    let merged = std::mem::take(&mut state.buffer);
    state.total_flushes += 1;
    let _ = tx.send(Some(merged));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn semantic_boundary_flushes_immediately() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        queue.push("Hello");
        queue.push(" world");
        queue.push(".");

        let chunk = consumer.next_chunk().await.expect("chunk");
        assert_eq!(chunk, "Hello world.");
    }

    #[tokio::test]
    async fn cjk_boundaries_also_flush() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        queue.push("你好");
        queue.push("。");
        let chunk = consumer.next_chunk().await.expect("chunk");
        assert_eq!(chunk, "你好。");
    }

    #[tokio::test]
    async fn timer_flushes_partial_buffer() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        queue.start();
        queue.push("no boundary yet");

        let chunk = tokio::time::timeout(Duration::from_secs(1), consumer.next_chunk())
            .await
            .expect("timer flush within a second")
            .expect("chunk");
        assert_eq!(chunk, "no boundary yet");
        queue.close();
    }

    #[tokio::test]
    async fn close_flushes_residue_and_terminates_consumer() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        queue.push("tail without boundary");
        queue.close();

        assert_eq!(
            consumer.next_chunk().await.as_deref(),
            Some("tail without boundary")
        );
        assert!(consumer.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        queue.push("x.");
        queue.close();
        queue.close();

        assert_eq!(consumer.next_chunk().await.as_deref(), Some("x."));
        assert!(consumer.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn pushes_after_close_are_ignored() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        queue.close();
        queue.push("late.");
        assert!(consumer.next_chunk().await.is_none());
        assert_eq!(queue.stats().total_tokens, 0);
    }

    #[tokio::test]
    async fn concatenation_of_chunks_equals_concatenation_of_tokens() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        let tokens = ["The ", "quick. ", "brown ", "fox!", " jumps", "\n", "over"];
        for token in tokens {
            queue.push(token);
        }
        queue.close();

        let mut collected = String::new();
        while let Some(chunk) = consumer.next_chunk().await {
            collected.push_str(&chunk);
        }
        assert_eq!(collected, tokens.concat());
    }

    #[tokio::test]
    async fn stats_report_compression() {
        let (queue, mut consumer) = StreamingEventQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c.");
        queue.close();

        while consumer.next_chunk().await.is_some() {}

        let stats = queue.stats();
        assert_eq!(stats.total_tokens, 3);
        assert_eq!(stats.total_flushes, 1);
        assert!((stats.compression_ratio - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stats_before_any_flush() {
        let (queue, _consumer) = StreamingEventQueue::new();
        queue.push("partial");
        let stats = queue.stats();
        assert_eq!(stats.total_tokens, 1);
        assert_eq!(stats.total_flushes, 0);
        assert!((stats.compression_ratio - 0.0).abs() < f64::EPSILON);
    }
}
