//! Huddle API Library
//!
//! Realtime chat server: WebSocket transport, room fan-out, presence and
//! assistant replies on top of Postgres.

pub mod assistant;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ChatError, ChatResult};
pub use state::AppState;
