//! WebSocket support for real-time chat
//!
//! Provides the realtime layer for chat rooms:
//! - Authenticated, per-chat connections with an explicit lifecycle
//! - Message relay with persistence before broadcast
//! - Typing indicators and online/offline presence
//! - Assistant replies in assistant-enabled chats
//!
//! # Architecture
//!
//! - **Connection**: One authenticated socket bound to one chat
//! - **Room**: Chat-based pub/sub for broadcasting events
//! - **Session**: Handshake, dispatch loop and guaranteed cleanup
//! - **State**: Global WebSocket state shared across all connections
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Wire frames for client/server communication

pub mod assistant_turn;
pub mod connection;
pub mod dispatch;
pub mod events;
pub mod handler;
pub mod presence;
pub mod room;
pub mod session;
pub mod state;

pub use handler::ws_handler;
pub use session::{SessionEnd, SessionHandler, SessionState, TransportError};
pub use state::{Capabilities, SessionSettings, WebSocketState};
