//! WebSocket event types and serialization
//!
//! Inbound frames are loosely-shaped JSON objects classified by which keys
//! they carry; outbound events are tagged by `type`.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use huddle_shared::{ChatId, MessageBody, MessageId, PersistedMessage, Sender, UserId};

use crate::error::ChatError;

// =============================================================================
// Client-to-Server Frames
// =============================================================================

/// Frames sent from client to server, in dispatch priority order
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Keepalive check; the token is echoed back verbatim
    Ping(Value),

    /// Typing indicator toggle
    Typing(bool),

    /// Message to persist and relay
    Content(MessageBody),

    /// Message-shaped frame with nothing to send (blank text, missing keys)
    Empty,

    /// Any other object; ignored for forward compatibility
    Unknown,
}

impl ClientFrame {
    /// Classify a text frame. Only non-JSON and non-object frames are errors.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ChatError::Protocol(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(ChatError::Protocol("frame is not a JSON object".to_string()));
        };

        if let Some(token) = fields.get("ping") {
            return Ok(Self::Ping(token.clone()));
        }

        if let Some(flag) = fields.get("is_typing") {
            return Ok(Self::Typing(truthy(flag)));
        }

        if let Some(ciphertext) = fields.get("encrypted_content") {
            return Ok(encrypted_body(ciphertext, fields.get("encrypted_keys"))
                .map(Self::Content)
                .unwrap_or(Self::Empty));
        }

        if let Some(content) = fields.get("content") {
            return Ok(match content.as_str().map(str::trim) {
                Some(text) if !text.is_empty() => Self::Content(MessageBody::plain(text)),
                _ => Self::Empty,
            });
        }

        Ok(Self::Unknown)
    }
}

/// Loose boolean coercion for `is_typing`
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn encrypted_body(ciphertext: &Value, keys: Option<&Value>) -> Option<MessageBody> {
    let encrypted_content = ciphertext.as_str().filter(|c| !c.trim().is_empty())?;
    let keys = keys?.as_object()?;

    let mut encrypted_keys = HashMap::with_capacity(keys.len());
    for (recipient, wrapped) in keys {
        encrypted_keys.insert(recipient.clone(), wrapped.as_str()?.to_string());
    }
    if encrypted_keys.is_empty() {
        return None;
    }

    Some(MessageBody::Encrypted {
        encrypted_content: encrypted_content.to_string(),
        encrypted_keys,
    })
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Heartbeat response
    Pong { ts: Value },

    /// Someone started or stopped typing
    TypingStatus { data: TypingStatus },

    /// A participant came online or went offline
    PresenceUpdate { data: PresenceUpdate },

    /// Message persisted in the room
    NewMessage { data: MessageEvent },

    /// Error message
    Error { detail: String },
}

impl ServerEvent {
    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error {
            detail: detail.into(),
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::TypingStatus { .. } => "typing_status",
            Self::PresenceUpdate { .. } => "presence_update",
            Self::NewMessage { .. } => "new_message",
            Self::Error { .. } => "error",
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TypingStatus {
    pub user_id: Sender,
    pub username: String,
    pub is_typing: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub is_online: bool,
    pub username: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

/// Message event data
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MessageEvent {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: Sender,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&PersistedMessage> for MessageEvent {
    fn from(message: &PersistedMessage) -> Self {
        Self {
            message_id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender,
            body: message.body.clone(),
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_priority() {
        let frame = ClientFrame::parse(r#"{"ping":"abc","is_typing":true,"content":"x"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping(json!("abc")));

        let frame = ClientFrame::parse(r#"{"is_typing":true,"content":"x"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Typing(true));

        let frame = ClientFrame::parse(r#"{"content":"  hello  "}"#).unwrap();
        assert_eq!(frame, ClientFrame::Content(MessageBody::plain("hello")));
    }

    #[test]
    fn test_typing_coercion() {
        assert_eq!(ClientFrame::parse(r#"{"is_typing":0}"#).unwrap(), ClientFrame::Typing(false));
        assert_eq!(ClientFrame::parse(r#"{"is_typing":"yes"}"#).unwrap(), ClientFrame::Typing(true));
        assert_eq!(ClientFrame::parse(r#"{"is_typing":null}"#).unwrap(), ClientFrame::Typing(false));
    }

    #[test]
    fn test_blank_and_malformed_content_is_empty() {
        assert_eq!(ClientFrame::parse(r#"{"content":"   "}"#).unwrap(), ClientFrame::Empty);
        assert_eq!(ClientFrame::parse(r#"{"content":42}"#).unwrap(), ClientFrame::Empty);
        assert_eq!(
            ClientFrame::parse(r#"{"encrypted_content":"c"}"#).unwrap(),
            ClientFrame::Empty
        );
        assert_eq!(
            ClientFrame::parse(r#"{"encrypted_content":"c","encrypted_keys":{}}"#).unwrap(),
            ClientFrame::Empty
        );
        assert_eq!(
            ClientFrame::parse(r#"{"encrypted_content":"c","encrypted_keys":{"u":1}}"#).unwrap(),
            ClientFrame::Empty
        );
    }

    #[test]
    fn test_encrypted_content() {
        let frame =
            ClientFrame::parse(r#"{"encrypted_content":"c","encrypted_keys":{"u1":"k1"}}"#).unwrap();
        match frame {
            ClientFrame::Content(MessageBody::Encrypted {
                encrypted_content,
                encrypted_keys,
            }) => {
                assert_eq!(encrypted_content, "c");
                assert_eq!(encrypted_keys.len(), 1);
            }
            other => panic!("Expected encrypted content, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_invalid_frames() {
        assert_eq!(ClientFrame::parse(r#"{"reaction":"+1"}"#).unwrap(), ClientFrame::Unknown);
        assert!(matches!(ClientFrame::parse("not json"), Err(ChatError::Protocol(_))));
        assert!(matches!(ClientFrame::parse("[1,2]"), Err(ChatError::Protocol(_))));
    }

    #[test]
    fn test_pong_serialization() {
        let event = ServerEvent::Pong { ts: json!("abc") };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"pong","ts":"abc"}"#);
    }

    #[test]
    fn test_error_event_serialization() {
        let json = serde_json::to_value(ServerEvent::error("Not a participant")).unwrap();
        assert_eq!(json, json!({ "type": "error", "detail": "Not a participant" }));
    }

    #[test]
    fn test_presence_serialization() {
        let user_id = UserId::new();
        let offline = ServerEvent::PresenceUpdate {
            data: PresenceUpdate {
                user_id,
                is_online: false,
                username: "alice".to_string(),
                last_seen: Some(OffsetDateTime::UNIX_EPOCH),
            },
        };
        let json = serde_json::to_value(offline).unwrap();
        assert_eq!(json["type"], "presence_update");
        assert_eq!(json["data"]["user_id"], json!(user_id.0.to_string()));
        assert_eq!(json["data"]["last_seen"], "1970-01-01T00:00:00Z");

        let online = ServerEvent::PresenceUpdate {
            data: PresenceUpdate {
                user_id,
                is_online: true,
                username: "alice".to_string(),
                last_seen: None,
            },
        };
        let json = serde_json::to_value(online).unwrap();
        assert!(json["data"]["last_seen"].is_null());
    }

    #[test]
    fn test_new_message_serialization() {
        let message = PersistedMessage {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender: Sender::Assistant,
            body: MessageBody::plain("hello"),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let event = ServerEvent::NewMessage {
            data: MessageEvent::from(&message),
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["data"]["sender_id"], "assistant");
        assert_eq!(json["data"]["content"], "hello");
        assert_eq!(json["data"]["message_id"], json!(message.id.0.to_string()));
        assert!(json["data"].get("encrypted_content").is_none());
    }
}
