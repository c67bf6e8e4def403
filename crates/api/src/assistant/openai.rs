//! OpenAI Chat Completions client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::{AssistantProvider, HistoryTurn, ProviderError, Role};

/// Behaviour instructions sent ahead of every conversation
pub const SYSTEM_PROMPT: &str = "You are an AI work assistant. \
Only answer questions related to work, such as company tasks, coding, or productivity. \
If asked about non-work topics, politely refuse.";

/// Maximum number of retry attempts for transient failures
const MAX_RETRIES: usize = 2;

/// Initial backoff duration for retries (100ms)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Maximum backoff duration for retries (2 seconds)
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<HistoryTurn>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiProvider {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// System prompt, then history, then the new user turn
    fn build_messages(user_text: &str, history: &[HistoryTurn]) -> Vec<HistoryTurn> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(HistoryTurn::new(Role::System, SYSTEM_PROMPT));
        messages.extend_from_slice(history);
        messages.push(HistoryTurn::new(Role::User, user_text));
        messages
    }

    async fn complete_once(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ProviderError::EmptyReply)
    }
}

#[async_trait]
impl AssistantProvider for OpenAiProvider {
    async fn reply(&self, user_text: &str, history: &[HistoryTurn]) -> Result<String, ProviderError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: Self::build_messages(user_text, history),
        };

        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.complete_once(&request).await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "Transient assistant error - will retry");
                    Err(result)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Permanent assistant error - will not retry");
                    Ok(result)
                }
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn provider(url: &str) -> OpenAiProvider {
        OpenAiProvider::new(url, "test-key", "gpt-4o-mini", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_reply_sends_system_history_and_user_turn() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": "earlier question" },
                    { "role": "assistant", "content": "earlier answer" },
                    { "role": "user", "content": "new question" }
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"an answer"}}]}"#)
            .create_async()
            .await;

        let history = vec![
            HistoryTurn::new(Role::User, "earlier question"),
            HistoryTurn::new(Role::Assistant, "earlier answer"),
        ];
        let reply = provider(&server.url()).reply("new question", &history).await.unwrap();

        assert_eq!(reply, "an answer");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .expect(MAX_RETRIES + 1)
            .create_async()
            .await;

        let result = provider(&server.url()).reply("hi", &[]).await;

        assert!(matches!(result, Err(ProviderError::Upstream { status: 503, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .expect(1)
            .create_async()
            .await;

        let result = provider(&server.url()).reply("hi", &[]).await;

        assert!(matches!(result, Err(ProviderError::Upstream { status: 401, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let result = provider(&server.url()).reply("hi", &[]).await;
        assert!(matches!(result, Err(ProviderError::EmptyReply)));
    }
}
