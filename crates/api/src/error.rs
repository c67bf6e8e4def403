//! Realtime error types and close-code mapping

use huddle_shared::StoreError;

use crate::assistant::ProviderError;

/// WebSocket close codes sent by the server
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const INTERNAL: u16 = 1011;
    /// Outbound queue overflowed; the client should reconnect
    pub const TRY_AGAIN_LATER: u16 = 1013;
    pub const UNAUTHORIZED: u16 = 4401;
    pub const FORBIDDEN: u16 = 4403;
    pub const NOT_FOUND: u16 = 4404;
}

/// Errors raised while serving a chat connection
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    // Handshake errors (terminal)
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("User is not a participant of this chat")]
    Authorization,
    #[error("Chat not found")]
    RoomNotFound,

    // Per-frame errors (connection stays open)
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("Assistant error: {0}")]
    Provider(#[from] ProviderError),
}

impl ChatError {
    /// Close code used when this error ends the session
    pub fn close_code(&self) -> u16 {
        match self {
            ChatError::Authentication(_) => close_code::UNAUTHORIZED,
            ChatError::Authorization => close_code::FORBIDDEN,
            ChatError::RoomNotFound => close_code::NOT_FOUND,
            ChatError::Protocol(_) | ChatError::Persistence(_) | ChatError::Provider(_) => {
                close_code::INTERNAL
            }
        }
    }

    /// Client-facing text for the `error` frame. Never leaks internals.
    pub fn detail(&self) -> &'static str {
        match self {
            ChatError::Authentication(_) => "Invalid or expired token",
            ChatError::Authorization => "Not a participant",
            ChatError::RoomNotFound => "Chat not found",
            ChatError::Protocol(_) => "Invalid frame",
            ChatError::Persistence(_) => "Failed to save message",
            ChatError::Provider(_) => "Assistant is unavailable, please try again",
        }
    }
}

/// Result type alias for realtime operations
pub type ChatResult<T> = Result<T, ChatError>;
