//! Storage capabilities consumed by the realtime layer
//!
//! The websocket core only talks to these traits. `PgStore` backs them with
//! Postgres in production; `MemoryStore` keeps everything in process.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use time::OffsetDateTime;

use huddle_shared::{ChatId, MessageBody, PersistedMessage, Room, Sender, StoreResult, UserId, UserProfile};

/// Room lookup and membership checks
#[async_trait]
pub trait ParticipantAuthorizer: Send + Sync {
    /// Returns `None` when the room does not exist
    async fn find_room(&self, chat_id: ChatId) -> StoreResult<Option<Room>>;

    async fn is_member(&self, user_id: UserId, chat_id: ChatId) -> StoreResult<bool>;
}

/// User profile lookup and advisory presence persistence
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserProfile>>;

    async fn set_presence(
        &self,
        user_id: UserId,
        is_online: bool,
        last_seen: Option<OffsetDateTime>,
    ) -> StoreResult<()>;
}

/// Durable message log
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message; the store assigns id and timestamp
    async fn append(
        &self,
        chat_id: ChatId,
        sender: Sender,
        body: MessageBody,
    ) -> StoreResult<PersistedMessage>;

    /// Most recent messages of a room, newest first
    async fn recent_history(&self, chat_id: ChatId, limit: usize) -> StoreResult<Vec<PersistedMessage>>;
}
