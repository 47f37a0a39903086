//! SSE streaming endpoint.
//!
//! Subscribes to the engine's event channel, filters for the requested
//! thread, and debounces log lines through the streaming event queue before
//! they go out as SSE data frames. One JSON object per line: `{node, log}`
//! entries followed by a terminal `{"event":"done"}` or `{"event":"error"}`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use litreview_core::stream::StreamingEventQueue;
use litreview_core::workflow::WorkflowEvent;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/research/stream/{thread_id}` — live per-stage log stream.
pub async fn stream_research(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // 404 before the stream starts when the thread is unknown.
    state.engine.status(&thread_id).await?;

    let mut rx = state.engine.subscribe();
    let (queue, consumer) = StreamingEventQueue::new();
    let queue = Arc::new(queue);
    queue.start();

    let producer_queue = Arc::clone(&queue);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(WorkflowEvent::Log {
                    thread_id: t,
                    node,
                    log,
                }) if t == thread_id => {
                    let line = json!({"node": node, "log": log}).to_string();
                    producer_queue.push(&format!("{line}\n"));
                }
                Ok(WorkflowEvent::Done { thread_id: t }) if t == thread_id => {
                    let line = json!({"event": "done"}).to_string();
                    producer_queue.push(&format!("{line}\n"));
                    break;
                }
                Ok(WorkflowEvent::Failed {
                    thread_id: t,
                    detail,
                }) if t == thread_id => {
                    let line = json!({"event": "error", "detail": detail}).to_string();
                    producer_queue.push(&format!("{line}\n"));
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, thread_id = %thread_id, "SSE subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        producer_queue.close();
        tracing::info!(thread_id = %thread_id, stats = ?producer_queue.stats(), "Stream closed");
    });

    let stream = futures::stream::unfold(consumer, |mut consumer| async move {
        consumer
            .next_chunk()
            .await
            .map(|chunk| (Ok(Event::default().data(chunk)), consumer))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
