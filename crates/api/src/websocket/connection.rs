//! WebSocket connection management
//!
//! A connection is one live socket bound to one user and one chat. Events
//! reach the socket through a bounded mailbox drained by the writer task, so
//! a slow client never blocks the task that produced the event.

use time::OffsetDateTime;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use huddle_shared::{ChatId, UserId, UserProfile};

use super::events::ServerEvent;

/// Items drained by a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    /// Send a close frame and stop writing
    Close { code: u16, reason: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID; the registry's handle identity
    pub session_id: Uuid,

    /// Authenticated user ID
    pub user_id: UserId,

    /// Display name, resolved once at handshake
    pub username: String,

    /// Chat this connection is attached to
    pub chat_id: ChatId,

    pub joined_at: OffsetDateTime,

    sender: mpsc::Sender<Outbound>,

    evicted: Notify,
}

impl Connection {
    /// Create a new connection
    pub fn new(user: &UserProfile, chat_id: ChatId, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user.id,
            username: user.username.clone(),
            chat_id,
            joined_at: OffsetDateTime::now_utc(),
            sender,
            evicted: Notify::new(),
        }
    }

    /// Queue an event for this connection without waiting
    ///
    /// A full queue counts as a failed delivery; the registry prunes the
    /// connection rather than buffer without bound.
    pub fn send(&self, event: ServerEvent) -> Result<(), SendError> {
        self.sender
            .try_send(Outbound::Event(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Signal the owning session that the registry dropped this connection
    pub fn evict(&self) {
        self.evicted.notify_one();
    }

    /// Resolves once `evict` has been called, even if it was called first
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            id: UserId::new(),
            username: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_delivers_to_mailbox() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new(&profile(), ChatId::new(), tx);

        conn.send(ServerEvent::error("boom")).unwrap();

        match rx.recv().await {
            Some(Outbound::Event(ServerEvent::Error { detail })) => assert_eq!(detail, "boom"),
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_and_closed_mailbox() {
        let (tx, rx) = mpsc::channel(1);
        let conn = Connection::new(&profile(), ChatId::new(), tx);

        conn.send(ServerEvent::error("first")).unwrap();
        assert_eq!(conn.send(ServerEvent::error("second")), Err(SendError::Full));

        drop(rx);
        assert!(conn.is_closed());
        assert_eq!(conn.send(ServerEvent::error("third")), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_eviction_before_wait_is_not_lost() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(&profile(), ChatId::new(), tx);

        conn.evict();
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.evicted())
            .await
            .expect("eviction should be observed");
    }

    #[test]
    fn test_connections_have_distinct_handles() {
        let (tx, _rx) = mpsc::channel(1);
        let user = profile();
        let chat_id = ChatId::new();
        let a = Connection::new(&user, chat_id, tx.clone());
        let b = Connection::new(&user, chat_id, tx);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.user_id, b.user_id);
    }
}
