//! Server-Sent Events support

use crate::runtime::{SseEvent, ThreadHandle};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Stream a thread to one client: an `init` snapshot, then live updates
pub fn sse_stream(handle: ThreadHandle) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(thread_events(handle).map(|event| Ok(sse_event_to_axum(event)))).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Live events for a thread. A receiver that falls behind is resynced with a
/// fresh `init` instead of silently losing thread updates.
fn thread_events(handle: ThreadHandle) -> impl Stream<Item = SseEvent> {
    // Subscribe before taking the snapshot so no update falls in between
    let broadcast_rx = handle.subscribe();
    let init = SseEvent::Init {
        snapshot: handle.snapshot(),
    };

    let updates = BroadcastStream::new(broadcast_rx).map(move |result| match result {
        Ok(event) => event,
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            tracing::debug!(missed, "SSE client lagged, resending snapshot");
            SseEvent::Init {
                snapshot: handle.snapshot(),
            }
        }
    });

    futures::stream::once(async move { init }).chain(updates)
}

fn sse_event_to_axum(event: SseEvent) -> Event {
    let (event_type, data) = event_payload(event);
    Event::default().event(event_type).data(data.to_string())
}

fn event_payload(event: SseEvent) -> (&'static str, serde_json::Value) {
    match event {
        SseEvent::Init { snapshot } => (
            "init",
            json!({
                "type": "init",
                "turns": snapshot.turns,
                "pending": snapshot.pending,
                "last_error": snapshot.last_error
            }),
        ),
        SseEvent::Thread { turns } => (
            "thread",
            json!({
                "type": "thread",
                "turns": turns
            }),
        ),
        SseEvent::StateChange { state } => (
            "state_change",
            json!({
                "type": "state_change",
                "pending": state.is_pending(),
                "state": state
            }),
        ),
        SseEvent::Error { message, kind } => (
            "error",
            json!({
                "type": "error",
                "message": message,
                "kind": kind,
                "transient": kind.is_transient()
            }),
        ),
    }
}
