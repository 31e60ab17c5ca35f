//! Server-Sent Events bridge
//!
//! New subscribers get a full snapshot first, then the live update stream.

use crate::runtime::{ConversationSnapshot, Update};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert the broadcast channel into an SSE stream, prefixed with an init
/// snapshot so clients never render from partial state.
pub fn sse_stream(
    snapshot: ConversationSnapshot,
    updates: tokio::sync::broadcast::Receiver<Update>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move {
        Ok(Event::default().event("init").data(
            json!({
                "type": "init",
                "conversation": snapshot,
            })
            .to_string(),
        ))
    });

    let live = BroadcastStream::new(updates).filter_map(|result| match result {
        Ok(update) => Some(Ok(update_to_event(&update))),
        Err(_) => None, // Skip lagged messages; the client can re-snapshot.
    });

    Sse::new(init.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn update_to_event(update: &Update) -> Event {
    let (event_type, data) = match update {
        Update::Event { event } => ("event", json!({ "type": "event", "event": event })),
        Update::Delivery { event } => ("delivery", json!({ "type": "delivery", "event": event })),
        Update::Proposal { proposal } => (
            "proposal",
            json!({ "type": "proposal", "proposal": proposal }),
        ),
        Update::Call { call } => ("call", json!({ "type": "call", "call": call })),
        Update::CallTick { elapsed_secs } => (
            "call_tick",
            json!({ "type": "call_tick", "elapsed_secs": elapsed_secs }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
