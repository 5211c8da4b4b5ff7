//! Websocket relay of tracker events.
//!
//! Each connection subscribes to the event broadcaster, then sends the live
//! table as `upsert` events, then forwards every event as one JSON text
//! frame. Clients apply upserts idempotently, so an entry that changes
//! between subscribing and the snapshot is simply sent twice.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use ogn_core::tracker::TrackEvent;

use crate::web::AppState;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| relay(socket, state))
}

async fn relay(socket: WebSocket, state: Arc<AppState>) {
    let mut events = state.events.subscribe();
    let subscriber = events.id();
    let snapshot = state.tracker.read().unwrap().snapshot();
    let (mut sink, mut incoming) = socket.split();

    tracing::debug!(subscriber, live = snapshot.len(), "Websocket opened");

    for ac in snapshot {
        if send_event(&mut sink, &TrackEvent::Upsert(ac)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(subscriber, "Websocket closed");
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &TrackEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(e) => {
            tracing::warn!(error = %e, id = event.id(), "Failed to encode event");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
