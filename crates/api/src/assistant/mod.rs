//! Assistant reply generation
//!
//! The realtime layer asks an [`AssistantProvider`] for the next assistant
//! turn given the latest user text and a short conversation window.

pub mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::Serialize;

/// Speaker of a history entry, as understood by chat-completion APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prior message in the conversation window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Assistant is not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream response had no reply text")]
    EmptyReply,

    #[error("Timed out after {0}s waiting for the assistant")]
    Timeout(u64),
}

impl ProviderError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Upstream { status, .. } => *status == 429 || *status >= 500,
            ProviderError::NotConfigured | ProviderError::EmptyReply | ProviderError::Timeout(_) => {
                false
            }
        }
    }
}

/// Request/response reply generator with no side effects
#[async_trait]
pub trait AssistantProvider: Send + Sync {
    async fn reply(&self, user_text: &str, history: &[HistoryTurn]) -> Result<String, ProviderError>;
}

/// Stand-in used when no provider credentials are configured
pub struct UnconfiguredProvider;

#[async_trait]
impl AssistantProvider for UnconfiguredProvider {
    async fn reply(&self, _user_text: &str, _history: &[HistoryTurn]) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_history_turn_serialization() {
        let turn = HistoryTurn::new(Role::Assistant, "hi");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "assistant", "content": "hi" }));
    }

    #[test]
    fn test_transient_classification() {
        let rate_limited = ProviderError::Upstream {
            status: 429,
            body: String::new(),
        };
        let bad_request = ProviderError::Upstream {
            status: 400,
            body: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(!bad_request.is_transient());
        assert!(!ProviderError::EmptyReply.is_transient());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails() {
        let result = UnconfiguredProvider.reply("hello", &[]).await;
        assert!(matches!(result, Err(ProviderError::NotConfigured)));
    }
}
