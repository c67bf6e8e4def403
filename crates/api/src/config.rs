//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origins: Vec<String>,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_leeway_secs: u64,

    // Assistant
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub assistant_model: String,
    pub assistant_history_limit: usize,
    pub assistant_timeout_secs: u64,
    pub assistant_display_name: String,

    // WebSocket
    pub ws_outbound_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_leeway_secs: parse_or("JWT_LEEWAY_SECS", 60),

            // Assistant
            openai_api_key: env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            assistant_model: env::var("ASSISTANT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            assistant_history_limit: {
                let limit = parse_or("ASSISTANT_HISTORY_LIMIT", 10);
                if limit == 0 {
                    return Err(ConfigError::Invalid(
                        "ASSISTANT_HISTORY_LIMIT must be greater than zero",
                    ));
                }
                limit
            },
            assistant_timeout_secs: {
                let secs = parse_or("ASSISTANT_TIMEOUT_SECS", 30);
                if secs == 0 {
                    return Err(ConfigError::Invalid(
                        "ASSISTANT_TIMEOUT_SECS must be greater than zero",
                    ));
                }
                secs
            },
            assistant_display_name: env::var("ASSISTANT_DISPLAY_NAME")
                .unwrap_or_else(|_| "Assistant".to_string()),

            // WebSocket
            ws_outbound_buffer: {
                let buffer = parse_or("WS_OUTBOUND_BUFFER", 256);
                if buffer == 0 {
                    return Err(ConfigError::Invalid(
                        "WS_OUTBOUND_BUFFER must be greater than zero",
                    ));
                }
                buffer
            },
        })
    }

    pub fn assistant_timeout(&self) -> Duration {
        Duration::from_secs(self.assistant_timeout_secs)
    }
}

/// Read an env var and parse it, falling back to `default` when unset or malformed
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to set required env vars for testing
    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    /// Helper to clear env vars after tests
    fn cleanup_config() {
        for key in [
            "DATABASE_URL",
            "JWT_SECRET",
            "OPENAI_API_KEY",
            "ASSISTANT_HISTORY_LIMIT",
            "ASSISTANT_TIMEOUT_SECS",
            "WS_OUTBOUND_BUFFER",
            "CORS_ALLOWED_ORIGINS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_config();
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(config.assistant_history_limit, 10);
        assert_eq!(config.assistant_timeout_secs, 30);
        assert_eq!(config.assistant_model, "gpt-4o-mini");
        assert_eq!(config.ws_outbound_buffer, 256);
        assert_eq!(config.cors_allowed_origins, vec!["*".to_string()]);
        assert!(config.openai_api_key.is_none());

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_missing_and_weak_secrets() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET"))));

        env::set_var("JWT_SECRET", "short");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::WeakSecret(_))));

        setup_minimal_config();
        env::remove_var("DATABASE_URL");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_zero_limits_rejected() {
        cleanup_config();
        setup_minimal_config();

        env::set_var("ASSISTANT_HISTORY_LIMIT", "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));
        env::remove_var("ASSISTANT_HISTORY_LIMIT");

        env::set_var("WS_OUTBOUND_BUFFER", "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));
        env::remove_var("WS_OUTBOUND_BUFFER");

        env::set_var("ASSISTANT_TIMEOUT_SECS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("ASSISTANT_TIMEOUT_SECS must be greater than zero"))
        ));
        env::set_var("ASSISTANT_TIMEOUT_SECS", "5");
        assert_eq!(Config::from_env().unwrap().assistant_timeout_secs, 5);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_blank_api_key_disables_assistant() {
        cleanup_config();
        setup_minimal_config();
        env::set_var("OPENAI_API_KEY", "   ");
        env::set_var("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example,");

        let config = Config::from_env().unwrap();
        assert!(config.openai_api_key.is_none());
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );

        cleanup_config();
    }
}
