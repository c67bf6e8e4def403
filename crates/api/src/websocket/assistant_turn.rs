//! Assistant turns in assistant-enabled chats
//!
//! A turn is bracketed by assistant typing events. Whatever happens in
//! between, the closing `is_typing: false` is always broadcast; failures are
//! reported only to the connection that triggered the turn.

use std::sync::Arc;
use std::time::Duration;

use huddle_shared::{ChatId, MessageBody, MessageId, PersistedMessage, Sender};

use super::connection::Connection;
use super::events::{MessageEvent, ServerEvent, TypingStatus};
use super::room::RoomRegistry;
use crate::assistant::{AssistantProvider, HistoryTurn, ProviderError, Role};
use crate::error::ChatResult;
use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Reply persisted and broadcast
    Replied(PersistedMessage),
    /// Error frame sent to the originating connection
    Failed,
    /// Trigger had no readable text (encrypted payload)
    Skipped,
}

pub struct AssistantTurnController {
    provider: Arc<dyn AssistantProvider>,
    messages: Arc<dyn MessageStore>,
    rooms: Arc<RoomRegistry>,
    history_limit: usize,
    timeout: Duration,
    display_name: String,
}

impl AssistantTurnController {
    pub fn new(
        provider: Arc<dyn AssistantProvider>,
        messages: Arc<dyn MessageStore>,
        rooms: Arc<RoomRegistry>,
        history_limit: usize,
        timeout: Duration,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            messages,
            rooms,
            history_limit,
            timeout,
            display_name: display_name.into(),
        }
    }

    /// Run one assistant turn in response to `trigger`, sent by `origin`
    pub async fn take_turn(&self, origin: &Connection, trigger: &PersistedMessage) -> TurnOutcome {
        let Some(user_text) = trigger.body.text() else {
            tracing::debug!(
                chat_id = %trigger.chat_id,
                message_id = %trigger.id,
                "Skipping assistant turn for unreadable message"
            );
            return TurnOutcome::Skipped;
        };

        self.set_typing(&trigger.chat_id, true).await;

        let outcome = match self.generate(trigger, user_text).await {
            Ok(reply) => {
                let event = ServerEvent::NewMessage {
                    data: MessageEvent::from(&reply),
                };
                self.rooms.broadcast(&reply.chat_id, &event, None).await;
                tracing::info!(
                    chat_id = %reply.chat_id,
                    message_id = %reply.id,
                    "Assistant replied"
                );
                TurnOutcome::Replied(reply)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    chat_id = %trigger.chat_id,
                    session_id = %origin.session_id,
                    "Assistant turn failed"
                );
                if let Err(send_err) = origin.send(ServerEvent::error(e.detail())) {
                    tracing::debug!(
                        error = %send_err,
                        session_id = %origin.session_id,
                        "Could not report assistant failure"
                    );
                }
                TurnOutcome::Failed
            }
        };

        self.set_typing(&trigger.chat_id, false).await;
        outcome
    }

    async fn generate(&self, trigger: &PersistedMessage, user_text: &str) -> ChatResult<PersistedMessage> {
        // One extra row so the window stays full after dropping the trigger itself
        let recent = self
            .messages
            .recent_history(trigger.chat_id, self.history_limit + 1)
            .await?;
        let history = history_turns(recent, trigger.id, self.history_limit);

        let reply = tokio::time::timeout(self.timeout, self.provider.reply(user_text, &history))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))??;

        let message = self
            .messages
            .append(trigger.chat_id, Sender::Assistant, MessageBody::plain(reply))
            .await?;
        Ok(message)
    }

    async fn set_typing(&self, chat_id: &ChatId, is_typing: bool) {
        let event = ServerEvent::TypingStatus {
            data: TypingStatus {
                user_id: Sender::Assistant,
                username: self.display_name.clone(),
                is_typing,
            },
        };
        self.rooms.broadcast(chat_id, &event, None).await;
    }
}

/// Rebuild the conversation window from newest-first history
///
/// Drops `exclude` (the message being answered, sent separately as the user
/// turn) and anything without readable text, keeps at most `limit` entries,
/// and returns them oldest first.
///
/// The caller fetches `limit + 1` rows, so every encrypted message inside
/// that window leaves one fewer turn; older plain messages are not fetched
/// to make up for them.
pub fn history_turns(
    newest_first: Vec<PersistedMessage>,
    exclude: MessageId,
    limit: usize,
) -> Vec<HistoryTurn> {
    let mut turns: Vec<HistoryTurn> = newest_first
        .into_iter()
        .filter(|message| message.id != exclude)
        .filter_map(|message| {
            let role = match message.sender {
                Sender::Assistant => Role::Assistant,
                Sender::Human(_) => Role::User,
            };
            message.body.text().map(|text| HistoryTurn::new(role, text))
        })
        .take(limit)
        .collect();
    turns.reverse();
    turns
}
