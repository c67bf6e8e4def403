//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::assistant::{AssistantProvider, OpenAiProvider, ProviderError, UnconfiguredProvider};
use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::store::PgStore;
use crate::websocket::{Capabilities, SessionSettings, WebSocketState};

/// State handed to every axum handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub ws_state: WebSocketState,
}

impl AppState {
    /// Wire the Postgres-backed capabilities and the assistant provider
    pub fn new(config: Config, pool: PgPool) -> Result<Self, ProviderError> {
        let store = Arc::new(PgStore::new(pool.clone()));

        let assistant: Arc<dyn AssistantProvider> = match &config.openai_api_key {
            Some(api_key) => Arc::new(OpenAiProvider::new(
                &config.openai_base_url,
                api_key,
                &config.assistant_model,
                config.assistant_timeout(),
            )?),
            None => {
                tracing::warn!("OPENAI_API_KEY not set, assistant chats will report errors");
                Arc::new(UnconfiguredProvider)
            }
        };

        let capabilities = Capabilities {
            credentials: Arc::new(JwtVerifier::new(&config.jwt_secret, config.jwt_leeway_secs)),
            authorizer: store.clone(),
            users: store.clone(),
            messages: store,
            assistant,
        };
        let ws_state = WebSocketState::new(capabilities, SessionSettings::from(&config));

        Ok(Self {
            config: Arc::new(config),
            pool,
            ws_state,
        })
    }
}
