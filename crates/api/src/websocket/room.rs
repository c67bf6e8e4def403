//! Chat room registry for pub/sub
//!
//! Tracks which live connections are attached to which chat and fans events
//! out to them. Broadcasts copy the membership under the lock and deliver
//! after releasing it; connections whose delivery failed are pruned once the
//! pass completes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use huddle_shared::ChatId;

use super::connection::Connection;
use super::events::ServerEvent;

/// Outcome of one broadcast call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Owns the live connection set of every chat
pub struct RoomRegistry {
    /// Map of chat_id -> connections; a session_id appears at most once per chat
    rooms: RwLock<HashMap<ChatId, Vec<Arc<Connection>>>>,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a chat room
    ///
    /// Returns false if this exact handle was already registered.
    pub async fn register(&self, chat_id: ChatId, conn: Arc<Connection>) -> bool {
        let mut rooms = self.rooms.write().await;
        let conns = rooms.entry(chat_id).or_default();

        if conns.iter().any(|c| c.session_id == conn.session_id) {
            return false;
        }
        conns.push(Arc::clone(&conn));

        tracing::debug!(
            chat_id = %chat_id,
            session_id = %conn.session_id,
            user_id = %conn.user_id,
            room_size = conns.len(),
            "Connection joined chat room"
        );
        true
    }

    /// Remove a connection from a chat room; no-op if absent
    ///
    /// Returns true if the connection was present.
    pub async fn unregister(&self, chat_id: &ChatId, session_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(conns) = rooms.get_mut(chat_id) else {
            return false;
        };

        let before_len = conns.len();
        conns.retain(|c| c.session_id != *session_id);
        let removed = conns.len() < before_len;

        // Clean up empty rooms
        if conns.is_empty() {
            rooms.remove(chat_id);
            tracing::debug!(chat_id = %chat_id, "Removed empty chat room");
        } else if removed {
            tracing::debug!(
                chat_id = %chat_id,
                session_id = %session_id,
                room_size = conns.len(),
                "Connection left chat room"
            );
        }

        removed
    }

    /// Snapshot of a room's current members
    pub async fn members(&self, chat_id: &ChatId) -> Vec<Arc<Connection>> {
        let rooms = self.rooms.read().await;
        rooms.get(chat_id).cloned().unwrap_or_default()
    }

    /// Broadcast an event to every connection in a chat room except `exclude`
    ///
    /// Delivery is best-effort per connection. A failed send never stops
    /// delivery to the rest; failed connections are removed afterwards.
    pub async fn broadcast(
        &self,
        chat_id: &ChatId,
        event: &ServerEvent,
        exclude: Option<Uuid>,
    ) -> BroadcastReport {
        let snapshot = self.members(chat_id).await;
        let mut report = BroadcastReport::default();
        let mut dead = HashSet::new();

        for conn in snapshot.iter().filter(|c| Some(c.session_id) != exclude) {
            match conn.send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    dead.insert(conn.session_id);
                    tracing::warn!(
                        chat_id = %chat_id,
                        session_id = %conn.session_id,
                        error = %e,
                        "Failed to send event to connection, marking dead"
                    );
                }
            }
        }

        if !dead.is_empty() {
            self.prune(chat_id, &dead).await;
        }

        tracing::debug!(
            chat_id = %chat_id,
            event_type = event.kind(),
            recipients = report.delivered,
            failed = report.failed,
            "Broadcast event to chat room"
        );

        report
    }

    async fn prune(&self, chat_id: &ChatId, dead: &HashSet<Uuid>) {
        let mut rooms = self.rooms.write().await;
        if let Some(conns) = rooms.get_mut(chat_id) {
            conns.retain(|c| {
                if dead.contains(&c.session_id) {
                    c.evict();
                    false
                } else {
                    true
                }
            });
            if conns.is_empty() {
                rooms.remove(chat_id);
            }
        }
    }

    /// Get room size (number of connections) for a chat
    pub async fn room_size(&self, chat_id: &ChatId) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(chat_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    /// Get total number of registered connections across rooms
    pub async fn connection_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.values().map(Vec::len).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
