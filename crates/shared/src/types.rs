//! Common types used across Huddle

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Chat (room) ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ChatId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Participants
// =============================================================================

/// Wire id of the assistant participant. Never a valid UUID, so it cannot
/// collide with a real user id.
pub const ASSISTANT_SENDER_ID: &str = "assistant";

/// Author of a message or typing signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    Human(UserId),
    Assistant,
}

impl Sender {
    /// Map the nullable `sender_id` column to a sender.
    /// Assistant messages are stored without a sender row.
    pub fn from_column(sender_id: Option<Uuid>) -> Self {
        match sender_id {
            Some(id) => Self::Human(UserId(id)),
            None => Self::Assistant,
        }
    }

    pub fn to_column(self) -> Option<Uuid> {
        match self {
            Self::Human(id) => Some(id.0),
            Self::Assistant => None,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human(id) => id.fmt(f),
            Self::Assistant => f.write_str(ASSISTANT_SENDER_ID),
        }
    }
}

impl Serialize for Sender {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Human(id) => id.0.serialize(serializer),
            Self::Assistant => serializer.serialize_str(ASSISTANT_SENDER_ID),
        }
    }
}

/// Minimal user record needed by the realtime layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
}

// =============================================================================
// Rooms
// =============================================================================

/// Kind of chat room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    /// Conversation with the assistant participant
    Ai,
}

/// Room metadata used for authorization and routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Room {
    pub id: ChatId,
    pub kind: ChatKind,
}

impl Room {
    pub fn is_assistant_enabled(&self) -> bool {
        self.kind == ChatKind::Ai
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Message payload: plaintext, or ciphertext with per-recipient wrapped keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageBody {
    Plain {
        content: String,
    },
    Encrypted {
        encrypted_content: String,
        encrypted_keys: HashMap<String, String>,
    },
}

impl MessageBody {
    pub fn plain(content: impl Into<String>) -> Self {
        Self::Plain {
            content: content.into(),
        }
    }

    /// Plaintext content, if the server can read it
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Plain { content } => Some(content),
            Self::Encrypted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
}

/// A message after the store assigned its id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: Sender,
    pub body: MessageBody,
    pub created_at: OffsetDateTime,
}

impl PersistedMessage {
    pub fn kind(&self) -> MessageKind {
        match self.sender {
            Sender::Human(_) => MessageKind::User,
            Sender::Assistant => MessageKind::Assistant,
        }
    }
}
