//! Connection lifecycle
//!
//! A session walks `Connecting -> Authenticating -> Authorizing -> Active ->
//! Closing -> Closed`; any handshake step may short-circuit to `Closing`.
//! The session is transport-agnostic: it consumes inbound text frames as a
//! stream and writes [`Outbound`] items to the connection's mailbox, so the
//! same code runs behind axum and in tests.
//!
//! Once a connection is registered, cleanup (unregister, offline presence)
//! runs exactly once no matter how the dispatch loop ends, including a panic
//! inside a frame handler or the session task being aborted.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use huddle_shared::{ChatId, Room, UserProfile};

use super::connection::{Connection, Outbound};
use super::dispatch::Dispatcher;
use super::events::ServerEvent;
use super::presence::PresenceTracker;
use super::room::RoomRegistry;
use super::state::WebSocketState;
use crate::error::{close_code, ChatError, ChatResult};

/// How long to wait for queue space when sending the final close frame
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Authorizing,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Authorizing)
                | (Authorizing, Active)
                | (Connecting | Authenticating | Authorizing | Active, Closing)
                | (Closing, Closed)
        )
    }
}

/// Inbound transport failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Handshake refused with this close code
    Rejected { code: u16 },
    /// Client closed or the inbound stream ended
    Disconnected,
    /// Inbound transport failed
    TransportFailed(String),
    /// Outbound queue overflowed and the registry dropped the connection
    Evicted,
    /// A frame handler panicked
    Aborted,
}

impl SessionEnd {
    fn close_code(&self) -> u16 {
        match self {
            SessionEnd::Rejected { code } => *code,
            SessionEnd::Disconnected | SessionEnd::TransportFailed(_) => close_code::NORMAL,
            SessionEnd::Evicted => close_code::TRY_AGAIN_LATER,
            SessionEnd::Aborted => close_code::INTERNAL,
        }
    }
}

/// A registered connection that must be released exactly once
///
/// Dropped without [`Registration::release`] (the session future was
/// cancelled while active), it schedules the release on the runtime instead.
struct Registration {
    rooms: Arc<RoomRegistry>,
    presence: Arc<PresenceTracker>,
    conn: Arc<Connection>,
    user: UserProfile,
    room: Room,
    released: bool,
}

impl Registration {
    async fn release(mut self) {
        release(&self.rooms, &self.presence, &self.conn, &self.user, &self.room).await;
        self.released = true;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                session_id = %self.conn.session_id,
                "Session dropped outside a runtime, connection not released"
            );
            return;
        };

        tracing::debug!(session_id = %self.conn.session_id, "Session cancelled, releasing connection");
        let rooms = Arc::clone(&self.rooms);
        let presence = Arc::clone(&self.presence);
        let conn = Arc::clone(&self.conn);
        let user = self.user.clone();
        let room = self.room;
        handle.spawn(async move {
            release(&rooms, &presence, &conn, &user, &room).await;
        });
    }
}

/// Unregister the connection and announce the user offline to the room
async fn release(
    rooms: &RoomRegistry,
    presence: &PresenceTracker,
    conn: &Connection,
    user: &UserProfile,
    room: &Room,
) {
    rooms.unregister(&room.id, &conn.session_id).await;
    let offline = presence.mark_offline(user, OffsetDateTime::now_utc()).await;
    rooms
        .broadcast(&room.id, &ServerEvent::PresenceUpdate { data: offline }, None)
        .await;

    tracing::info!(
        session_id = %conn.session_id,
        user_id = %user.id,
        chat_id = %room.id,
        "WebSocket session closed"
    );
}

/// Drives one connection from handshake to close
pub struct SessionHandler {
    ws: WebSocketState,
    chat_id: ChatId,
    token: String,
    outbox: mpsc::Sender<Outbound>,
    state: SessionState,
}

impl SessionHandler {
    pub fn new(
        ws: WebSocketState,
        chat_id: ChatId,
        token: impl Into<String>,
        outbox: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            ws,
            chat_id,
            token: token.into(),
            outbox,
            state: SessionState::Connecting,
        }
    }

    /// Run the session to completion over `inbound` text frames
    pub async fn run<S>(mut self, inbound: S) -> SessionEnd
    where
        S: Stream<Item = Result<String, TransportError>> + Send,
    {
        self.transition(SessionState::Authenticating);

        let end = match self.handshake().await {
            Ok((user, room)) => {
                let registration = self.activate(user, room).await;
                self.transition(SessionState::Active);

                let end = AssertUnwindSafe(self.pump(&registration, inbound))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(
                            session_id = %registration.conn.session_id,
                            "Frame handler panicked, closing session"
                        );
                        SessionEnd::Aborted
                    });

                self.transition(SessionState::Closing);
                registration.release().await;
                end
            }
            Err(e) => {
                let code = e.close_code();
                tracing::info!(
                    chat_id = %self.chat_id,
                    error = %e,
                    close_code = code,
                    "WebSocket handshake rejected"
                );
                self.transition(SessionState::Closing);
                self.reject(&e).await;
                SessionEnd::Rejected { code }
            }
        };

        self.close(end.close_code()).await;
        self.transition(SessionState::Closed);
        end
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = ?self.state, to = ?next, "Invalid session transition");
            return;
        }
        tracing::trace!(chat_id = %self.chat_id, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    async fn handshake(&mut self) -> ChatResult<(UserProfile, Room)> {
        let user_id = self
            .ws
            .credentials
            .decode(&self.token)
            .map_err(|e| ChatError::Authentication(e.to_string()))?;
        let user = self
            .ws
            .users
            .find_user(user_id)
            .await?
            .ok_or_else(|| ChatError::Authentication(format!("unknown user {user_id}")))?;

        self.transition(SessionState::Authorizing);

        let room = self
            .ws
            .authorizer
            .find_room(self.chat_id)
            .await?
            .ok_or(ChatError::RoomNotFound)?;
        if !self.ws.authorizer.is_member(user.id, room.id).await? {
            return Err(ChatError::Authorization);
        }

        Ok((user, room))
    }

    async fn reject(&self, error: &ChatError) {
        let detail = match error {
            ChatError::Persistence(_) => "Service temporarily unavailable",
            other => other.detail(),
        };
        self.enqueue(Outbound::Event(ServerEvent::error(detail))).await;
    }

    async fn activate(&self, user: UserProfile, room: Room) -> Registration {
        let conn = Arc::new(Connection::new(&user, room.id, self.outbox.clone()));

        let online = self.ws.presence.mark_online(&user).await;
        self.ws.rooms.register(room.id, Arc::clone(&conn)).await;
        // Guarded from here on
        let registration = Registration {
            rooms: Arc::clone(&self.ws.rooms),
            presence: Arc::clone(&self.ws.presence),
            conn,
            user,
            room,
            released: false,
        };

        self.ws
            .rooms
            .broadcast(
                &room.id,
                &ServerEvent::PresenceUpdate { data: online },
                Some(registration.conn.session_id),
            )
            .await;

        tracing::info!(
            session_id = %registration.conn.session_id,
            user_id = %registration.user.id,
            chat_id = %room.id,
            "WebSocket session active"
        );

        registration
    }

    async fn pump<S>(&self, registration: &Registration, inbound: S) -> SessionEnd
    where
        S: Stream<Item = Result<String, TransportError>> + Send,
    {
        let mut inbound = std::pin::pin!(inbound);
        let dispatcher = Dispatcher::new(&self.ws, &registration.conn, &registration.room);

        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => {
                        dispatcher.handle_text(&text).await;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            session_id = %registration.conn.session_id,
                            error = %e,
                            "Inbound transport failed"
                        );
                        return SessionEnd::TransportFailed(e.0);
                    }
                    None => return SessionEnd::Disconnected,
                },
                _ = registration.conn.evicted() => {
                    tracing::warn!(
                        session_id = %registration.conn.session_id,
                        "Connection fell behind and was evicted"
                    );
                    return SessionEnd::Evicted;
                }
            }
        }
    }

    async fn close(&self, code: u16) {
        let reason = match code {
            close_code::NORMAL => "",
            close_code::TRY_AGAIN_LATER => "Too slow",
            close_code::UNAUTHORIZED => "Unauthorized",
            close_code::FORBIDDEN => "Forbidden",
            close_code::NOT_FOUND => "Not found",
            _ => "Internal error",
        };
        self.enqueue(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
        .await;
    }

    async fn enqueue(&self, item: Outbound) {
        match tokio::time::timeout(CLOSE_GRACE, self.outbox.send(item)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::debug!(chat_id = %self.chat_id, "Writer already gone"),
            Err(_) => tracing::debug!(chat_id = %self.chat_id, "Timed out queueing frame"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::assistant::UnconfiguredProvider;
    use crate::auth::CredentialVerifier;
    use crate::auth::JwtError;
    use crate::store::MemoryStore;
    use crate::websocket::state::{Capabilities, SessionSettings};
    use huddle_shared::{ChatKind, UserId};
    use std::collections::HashMap;
    use tokio_stream::wrappers::ReceiverStream;

    /// Maps fixed tokens to users
    struct TokenTable(HashMap<String, UserId>);

    impl CredentialVerifier for TokenTable {
        fn decode(&self, token: &str) -> Result<UserId, JwtError> {
            self.0.get(token).copied().ok_or(JwtError::Invalid)
        }
    }

    fn state(store: &Arc<MemoryStore>, tokens: HashMap<String, UserId>) -> WebSocketState {
        WebSocketState::new(
            Capabilities {
                credentials: Arc::new(TokenTable(tokens)),
                authorizer: store.clone(),
                users: store.clone(),
                messages: store.clone(),
                assistant: Arc::new(UnconfiguredProvider),
            },
            SessionSettings::default(),
        )
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Authenticating));
        assert!(Authorizing.can_transition_to(Active));
        assert!(Authenticating.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Connecting.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Authorizing));
    }

    #[tokio::test]
    async fn test_rejected_session_never_registers() {
        let store = Arc::new(MemoryStore::new());
        let room = store.add_room(ChatKind::Group).await;
        let ws = state(&store, HashMap::new());
        let (tx, mut rx) = mpsc::channel(8);

        let (_frames_tx, frames_rx) = mpsc::channel::<Result<String, TransportError>>(1);
        let end = SessionHandler::new(ws.clone(), room.id, "bogus", tx)
            .run(ReceiverStream::new(frames_rx))
            .await;

        assert_eq!(end, SessionEnd::Rejected { code: close_code::UNAUTHORIZED });
        assert_eq!(ws.rooms.connection_count().await, 0);
        assert!(matches!(rx.recv().await, Some(Outbound::Event(ServerEvent::Error { .. }))));
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code: close_code::UNAUTHORIZED, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_chat_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("alice").await;
        let ws = state(&store, HashMap::from([("t".to_string(), user.id)]));
        let (tx, mut rx) = mpsc::channel(8);

        let (_frames_tx, frames_rx) = mpsc::channel::<Result<String, TransportError>>(1);
        let end = SessionHandler::new(ws, ChatId::new(), "t", tx)
            .run(ReceiverStream::new(frames_rx))
            .await;

        assert_eq!(end, SessionEnd::Rejected { code: close_code::NOT_FOUND });
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Event(ServerEvent::Error { detail })) if detail == "Chat not found"
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_still_cleans_up() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("alice").await;
        let room = store.add_room(ChatKind::Group).await;
        store.add_member(room.id, user.id).await;
        let ws = state(&store, HashMap::from([("t".to_string(), user.id)]));
        let (tx, mut rx) = mpsc::channel(8);

        let (frames_tx, frames_rx) = mpsc::channel::<Result<String, TransportError>>(4);
        frames_tx
            .send(Err(TransportError("connection reset".into())))
            .await
            .unwrap();
        let end = SessionHandler::new(ws.clone(), room.id, "t", tx)
            .run(ReceiverStream::new(frames_rx))
            .await;

        assert_eq!(end, SessionEnd::TransportFailed("connection reset".into()));
        assert_eq!(ws.rooms.connection_count().await, 0);
        assert!(ws.presence.state(&user.id).await.is_none());
        assert!(!store.presence(user.id).await.unwrap().is_online);
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code: close_code::NORMAL, .. })
        ));
    }

    #[tokio::test]
    async fn test_evicted_connection_closes_with_try_again_later() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("alice").await;
        let room = store.add_room(ChatKind::Group).await;
        store.add_member(room.id, user.id).await;
        let ws = state(&store, HashMap::from([("t".to_string(), user.id)]));

        // One-slot mailbox nobody drains
        let (tx, mut rx) = mpsc::channel(1);
        let (_frames_tx, frames_rx) = mpsc::channel::<Result<String, TransportError>>(1);
        let session = tokio::spawn(
            SessionHandler::new(ws.clone(), room.id, "t", tx).run(ReceiverStream::new(frames_rx)),
        );

        while ws.rooms.room_size(&room.id).await == 0 {
            tokio::task::yield_now().await;
        }
        ws.rooms.broadcast(&room.id, &ServerEvent::error("a"), None).await;
        ws.rooms.broadcast(&room.id, &ServerEvent::error("b"), None).await;

        // Make room for the close frame
        assert!(matches!(rx.recv().await, Some(Outbound::Event(_))));
        let end = session.await.unwrap();

        assert_eq!(end, SessionEnd::Evicted);
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code: close_code::TRY_AGAIN_LATER, .. })
        ));
    }
}
