//! User presence tracking
//!
//! Presence is advisory. Online users are tracked in memory and transitions
//! are written through to the user directory best-effort; a failed write is
//! logged and the event is still returned for broadcast. The tracker knows
//! nothing about rooms, callers decide where the event goes.

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;

use huddle_shared::{UserId, UserProfile};

use super::events::PresenceUpdate;
use crate::store::UserDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceState {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: Option<OffsetDateTime>,
}

pub struct PresenceTracker {
    states: RwLock<HashMap<UserId, PresenceState>>,
    users: Arc<dyn UserDirectory>,
}

impl PresenceTracker {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            users,
        }
    }

    /// Mark a user online. Repeating this for an online user changes nothing.
    pub async fn mark_online(&self, user: &UserProfile) -> PresenceUpdate {
        let changed = {
            let mut states = self.states.write().await;
            let state = states.entry(user.id).or_insert(PresenceState {
                user_id: user.id,
                is_online: false,
                last_seen: None,
            });
            let changed = !state.is_online;
            state.is_online = true;
            changed
        };

        if changed {
            self.persist(user.id, true, None).await;
        }

        PresenceUpdate {
            user_id: user.id,
            is_online: true,
            username: user.username.clone(),
            last_seen: None,
        }
    }

    /// Mark a user offline as of `last_seen`
    ///
    /// The user is dropped from the tracker; `last_seen` lives on in the
    /// returned event and the user directory.
    pub async fn mark_offline(&self, user: &UserProfile, last_seen: OffsetDateTime) -> PresenceUpdate {
        self.states.write().await.remove(&user.id);

        self.persist(user.id, false, Some(last_seen)).await;

        PresenceUpdate {
            user_id: user.id,
            is_online: false,
            username: user.username.clone(),
            last_seen: Some(last_seen),
        }
    }

    /// Current state of a user the tracker has seen online, if any
    pub async fn state(&self, user_id: &UserId) -> Option<PresenceState> {
        self.states.read().await.get(user_id).copied()
    }

    async fn persist(&self, user_id: UserId, is_online: bool, last_seen: Option<OffsetDateTime>) {
        if let Err(e) = self.users.set_presence(user_id, is_online, last_seen).await {
            tracing::warn!(
                error = %e,
                user_id = %user_id,
                is_online,
                "Failed to persist user presence"
            );
        }
    }
}
