//! In-process storage used by tests and local runs

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use huddle_shared::{
    ChatId, ChatKind, MessageBody, MessageId, PersistedMessage, Room, Sender, StoreError,
    StoreResult, UserId, UserProfile,
};

use super::{MessageStore, ParticipantAuthorizer, UserDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredPresence {
    pub is_online: bool,
    pub last_seen: Option<OffsetDateTime>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserProfile>,
    presence: HashMap<UserId, StoredPresence>,
    rooms: HashMap<ChatId, Room>,
    members: HashSet<(ChatId, UserId)>,
    /// Append order per room, oldest first
    messages: HashMap<ChatId, Vec<PersistedMessage>>,
}

/// Keeps users, rooms and messages in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, username: &str) -> UserProfile {
        let profile = UserProfile {
            id: UserId::new(),
            username: username.to_string(),
        };
        self.inner
            .write()
            .await
            .users
            .insert(profile.id, profile.clone());
        profile
    }

    pub async fn add_room(&self, kind: ChatKind) -> Room {
        let room = Room {
            id: ChatId::new(),
            kind,
        };
        self.inner.write().await.rooms.insert(room.id, room);
        room
    }

    pub async fn add_member(&self, chat_id: ChatId, user_id: UserId) {
        self.inner.write().await.members.insert((chat_id, user_id));
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn messages(&self, chat_id: ChatId) -> Vec<PersistedMessage> {
        self.inner
            .read()
            .await
            .messages
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn presence(&self, user_id: UserId) -> Option<StoredPresence> {
        self.inner.read().await.presence.get(&user_id).copied()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ParticipantAuthorizer for MemoryStore {
    async fn find_room(&self, chat_id: ChatId) -> StoreResult<Option<Room>> {
        Ok(self.inner.read().await.rooms.get(&chat_id).copied())
    }

    async fn is_member(&self, user_id: UserId, chat_id: ChatId) -> StoreResult<bool> {
        Ok(self.inner.read().await.members.contains(&(chat_id, user_id)))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserProfile>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn set_presence(
        &self,
        user_id: UserId,
        is_online: bool,
        last_seen: Option<OffsetDateTime>,
    ) -> StoreResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        let entry = inner.presence.entry(user_id).or_insert(StoredPresence {
            is_online,
            last_seen: None,
        });
        entry.is_online = is_online;
        if last_seen.is_some() {
            entry.last_seen = last_seen;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(
        &self,
        chat_id: ChatId,
        sender: Sender,
        body: MessageBody,
    ) -> StoreResult<PersistedMessage> {
        self.check_writable()?;
        let message = PersistedMessage {
            id: MessageId::new(),
            chat_id,
            sender,
            body,
            created_at: OffsetDateTime::now_utc(),
        };
        self.inner
            .write()
            .await
            .messages
            .entry(chat_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn recent_history(&self, chat_id: ChatId, limit: usize) -> StoreResult<Vec<PersistedMessage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&chat_id)
            .map(|messages| messages.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
