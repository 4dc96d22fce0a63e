//! WebSocket endpoint streaming thread events.
//!
//! Subscribers get a recovery snapshot first, then live events in publish
//! order. The socket closes when the thread's topic is removed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use weft_core::event::ThreadSubscription;

use crate::http::error::AppError;
use crate::state::AppState;

/// Commands a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Ping,
}

/// GET /ws/threads/:id - Upgrade to a WebSocket streaming thread events.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(thread_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    // Snapshot before the upgrade so the recovery event reflects the state
    // the client is catching up from.
    let thread = state.registry.get(&thread_id)?;
    let subscription = state.hub.subscribe(&thread);

    tracing::debug!(%thread_id, "websocket subscriber attached");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, thread_id, subscription)))
}

async fn handle_socket(socket: WebSocket, thread_id: String, mut subscription: ThreadSubscription) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = subscription.next() => {
                match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%thread_id, "failed to serialize thread event: {err}");
                        }
                    },
                    None => {
                        // Topic removed; tell the client we are done.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientCommand::Ping) = serde_json::from_str(&text) {
                            let pong = r#"{"type":"pong"}"#;
                            if sender.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(%thread_id, "websocket receive error: {err}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(%thread_id, "websocket subscriber detached");
}
