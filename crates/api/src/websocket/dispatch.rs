//! Per-frame dispatch for an active session

use std::sync::Arc;

use huddle_shared::{MessageBody, MessageId, Room, Sender};

use super::assistant_turn::TurnOutcome;
use super::connection::Connection;
use super::events::{ClientFrame, MessageEvent, ServerEvent, TypingStatus};
use super::state::WebSocketState;
use crate::error::{ChatError, ChatResult};

/// What a single inbound frame resulted in
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Ponged,
    TypingRelayed,
    MessageRelayed {
        message_id: MessageId,
        assistant: Option<TurnOutcome>,
    },
    Ignored,
}

/// Routes frames from one connection into its room
pub struct Dispatcher<'a> {
    ws: &'a WebSocketState,
    conn: &'a Arc<Connection>,
    room: &'a Room,
}

impl<'a> Dispatcher<'a> {
    pub fn new(ws: &'a WebSocketState, conn: &'a Arc<Connection>, room: &'a Room) -> Self {
        Self { ws, conn, room }
    }

    /// Handle one text frame. Errors never escape; the session keeps going.
    pub async fn handle_text(&self, text: &str) -> Option<FrameOutcome> {
        let result = match ClientFrame::parse(text) {
            Ok(frame) => self.dispatch(frame).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    pub async fn dispatch(&self, frame: ClientFrame) -> ChatResult<FrameOutcome> {
        match frame {
            ClientFrame::Ping(ts) => {
                self.reply(ServerEvent::Pong { ts });
                Ok(FrameOutcome::Ponged)
            }
            ClientFrame::Typing(is_typing) => {
                let event = ServerEvent::TypingStatus {
                    data: TypingStatus {
                        user_id: Sender::Human(self.conn.user_id),
                        username: self.conn.username.clone(),
                        is_typing,
                    },
                };
                self.ws
                    .rooms
                    .broadcast(&self.conn.chat_id, &event, Some(self.conn.session_id))
                    .await;
                Ok(FrameOutcome::TypingRelayed)
            }
            ClientFrame::Content(body) => self.relay_message(body).await,
            ClientFrame::Empty | ClientFrame::Unknown => Ok(FrameOutcome::Ignored),
        }
    }

    async fn relay_message(&self, body: MessageBody) -> ChatResult<FrameOutcome> {
        let message = self
            .ws
            .messages
            .append(self.conn.chat_id, Sender::Human(self.conn.user_id), body)
            .await?;

        tracing::debug!(
            chat_id = %message.chat_id,
            message_id = %message.id,
            kind = ?message.kind(),
            "Message persisted"
        );

        // The sender gets its own copy as the delivery acknowledgement
        let event = ServerEvent::NewMessage {
            data: MessageEvent::from(&message),
        };
        self.ws.rooms.broadcast(&self.conn.chat_id, &event, None).await;

        let assistant = if self.room.is_assistant_enabled() {
            Some(self.ws.assistant.take_turn(self.conn, &message).await)
        } else {
            None
        };

        Ok(FrameOutcome::MessageRelayed {
            message_id: message.id,
            assistant,
        })
    }

    fn report(&self, error: ChatError) {
        match error {
            ChatError::Protocol(reason) => {
                tracing::debug!(
                    session_id = %self.conn.session_id,
                    reason = %reason,
                    "Ignoring malformed frame"
                );
            }
            other => {
                tracing::warn!(
                    error = %other,
                    session_id = %self.conn.session_id,
                    chat_id = %self.conn.chat_id,
                    "Frame handling failed"
                );
                self.reply(ServerEvent::error(other.detail()));
            }
        }
    }

    fn reply(&self, event: ServerEvent) {
        if let Err(e) = self.conn.send(event) {
            tracing::debug!(
                error = %e,
                session_id = %self.conn.session_id,
                "Dropped reply to connection"
            );
        }
    }
}
