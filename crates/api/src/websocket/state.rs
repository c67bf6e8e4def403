//! Global WebSocket state management
//!
//! Bundles the shared registry, presence tracker and the external
//! capabilities every connection task needs.

use std::sync::Arc;
use std::time::Duration;

use super::assistant_turn::AssistantTurnController;
use super::presence::PresenceTracker;
use super::room::RoomRegistry;
use crate::assistant::AssistantProvider;
use crate::auth::CredentialVerifier;
use crate::config::Config;
use crate::store::{MessageStore, ParticipantAuthorizer, UserDirectory};

/// External capabilities consumed by the realtime layer
#[derive(Clone)]
pub struct Capabilities {
    pub credentials: Arc<dyn CredentialVerifier>,
    pub authorizer: Arc<dyn ParticipantAuthorizer>,
    pub users: Arc<dyn UserDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub assistant: Arc<dyn AssistantProvider>,
}

/// Tunables for connection handling
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    pub assistant_history_limit: usize,
    pub assistant_timeout: Duration,
    pub assistant_display_name: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            assistant_history_limit: 10,
            assistant_timeout: Duration::from_secs(30),
            assistant_display_name: "Assistant".to_string(),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            outbound_buffer: config.ws_outbound_buffer,
            assistant_history_limit: config.assistant_history_limit,
            assistant_timeout: config.assistant_timeout(),
            assistant_display_name: config.assistant_display_name.clone(),
        }
    }
}

/// Global WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    pub rooms: Arc<RoomRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub assistant: Arc<AssistantTurnController>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub authorizer: Arc<dyn ParticipantAuthorizer>,
    pub users: Arc<dyn UserDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub settings: SessionSettings,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new(capabilities: Capabilities, settings: SessionSettings) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let presence = Arc::new(PresenceTracker::new(Arc::clone(&capabilities.users)));
        let assistant = Arc::new(AssistantTurnController::new(
            capabilities.assistant,
            Arc::clone(&capabilities.messages),
            Arc::clone(&rooms),
            settings.assistant_history_limit,
            settings.assistant_timeout,
            settings.assistant_display_name.clone(),
        ));

        Self {
            rooms,
            presence,
            assistant,
            credentials: capabilities.credentials,
            authorizer: capabilities.authorizer,
            users: capabilities.users,
            messages: capabilities.messages,
            settings,
        }
    }

    /// Get statistics about the WebSocket state
    pub async fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            active_connections: self.rooms.connection_count().await,
            active_rooms: self.rooms.room_count().await,
        }
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of chats with at least one connection
    pub active_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::UnconfiguredProvider;
    use crate::auth::JwtVerifier;
    use crate::store::MemoryStore;
    use crate::websocket::connection::Connection;
    use huddle_shared::ChatKind;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_stats() {
        let store = Arc::new(MemoryStore::new());
        let state = WebSocketState::new(
            Capabilities {
                credentials: Arc::new(JwtVerifier::new("test-secret-key-at-least-32-chars!", 60)),
                authorizer: store.clone(),
                users: store.clone(),
                messages: store.clone(),
                assistant: Arc::new(UnconfiguredProvider),
            },
            SessionSettings::default(),
        );

        let user = store.add_user("alice").await;
        let room = store.add_room(ChatKind::Group).await;
        let (tx, _rx) = mpsc::channel(1);
        state
            .rooms
            .register(room.id, Arc::new(Connection::new(&user, room.id, tx)))
            .await;

        let stats = state.get_stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.active_rooms, 1);
    }
}
