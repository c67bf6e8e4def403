//! JWT validation for realtime connections
//!
//! Tokens are issued by the HTTP auth service; this side only verifies them.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huddle_shared::UserId;

use super::CredentialVerifier;

/// Claims carried by access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID as string)
    pub sub: Option<String>,
    /// Expiration
    pub exp: i64,
    /// Issued at
    #[serde(default)]
    pub iat: Option<i64>,
}

/// HS256 token verifier
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    leeway_secs: u64,
}

impl JwtVerifier {
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            leeway_secs,
        }
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        if token.is_empty() {
            return Err(JwtError::Missing);
        }

        // Explicit algorithm prevents algorithm confusion attacks
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }
}

impl CredentialVerifier for JwtVerifier {
    fn decode(&self, token: &str) -> Result<UserId, JwtError> {
        let claims = self.validate_token(token)?;
        let sub = claims.sub.ok_or(JwtError::MissingSubject)?;
        let user_id = Uuid::parse_str(&sub).map_err(|_| JwtError::MissingSubject)?;
        Ok(UserId(user_id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("No token supplied")]
    Missing,
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token has no usable subject")]
    MissingSubject,
    #[error("Token validation failed: {0}")]
    Validation(String),
}
