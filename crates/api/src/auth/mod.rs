//! Credential verification for realtime connections

pub mod jwt;

pub use jwt::{Claims, JwtError, JwtVerifier};

use huddle_shared::UserId;

/// Turns a bearer credential into the user it was issued to
pub trait CredentialVerifier: Send + Sync {
    fn decode(&self, token: &str) -> Result<UserId, JwtError>;
}
