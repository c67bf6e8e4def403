//! WebSocket handler for Axum
//!
//! Upgrades `/ws/chat/:chat_id`, splits the socket into a writer task that
//! drains the connection mailbox and an inbound text stream fed to the
//! session. Authentication happens after the upgrade so refusals can be
//! delivered in-band as an error frame plus a close code.

use std::borrow::Cow;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{future, stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use huddle_shared::ChatId;

use super::connection::Outbound;
use super::session::{SessionHandler, TransportError};
use super::state::WebSocketState;
use crate::state::AppState;

/// How long the writer may keep flushing after the session ends
const WRITER_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    #[serde(default)]
    token: String,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// A malformed chat id maps to the nil id, which never names a room, so the
/// client still gets an in-band not-found after authentication.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(raw_chat_id): Path<String>,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Response {
    let chat_id = ChatId::from(Uuid::parse_str(&raw_chat_id).unwrap_or(Uuid::nil()));
    tracing::debug!(chat_id = %chat_id, "WebSocket connection upgrade requested");

    let ws_state = app_state.ws_state.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, chat_id, params.token, ws_state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, chat_id: ChatId, token: String, ws_state: WebSocketState) {
    let (sender, receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Outbound>(ws_state.settings.outbound_buffer);
    let mut send_task = tokio::spawn(write_outbound(sender, rx));

    // Text frames only; a close frame ends the stream
    let inbound = receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError(e.to_string()))),
            })
        });

    let end = SessionHandler::new(ws_state, chat_id, token, tx)
        .run(inbound)
        .await;
    tracing::debug!(chat_id = %chat_id, end = ?end, "WebSocket session finished");

    if tokio::time::timeout(WRITER_GRACE, &mut send_task).await.is_err() {
        tracing::debug!(chat_id = %chat_id, "Writer did not finish in time, aborting");
        send_task.abort();
    }
}

/// Drain the mailbox into the socket until a close item or a send failure
async fn write_outbound(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            },
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: Cow::Owned(reason),
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}
