//! Client configuration loaded from the environment.

use std::time::Duration;
use thiserror::Error;

use crate::sync::transport::TransportConfig;
use crate::sync::SessionConfig;

/// Errors raised while reading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

/// Configuration for the headless collaboration client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the real-time server
    pub server_url: String,
    /// Local participant id; random when unset
    pub user_id: Option<String>,
    pub display_name: String,
    pub session_id: String,
    pub language: String,
    /// Endpoint of the code-execution service
    pub execution_url: String,
    pub execution_timeout: Duration,
    pub reconnect_delay: Duration,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:5000/ws".to_string(),
            user_id: None,
            display_name: "Anonymous".to_string(),
            session_id: "playground".to_string(),
            language: "javascript".to_string(),
            execution_url: "http://localhost:5000/api/execute".to_string(),
            execution_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(var) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidNumber { var, value }),
                None => Ok(default),
            }
        };

        let session = SessionConfig {
            typing_idle: millis("TYPING_IDLE_MS", defaults.session.typing_idle)?,
            typing_timeout: millis("TYPING_TIMEOUT_MS", defaults.session.typing_timeout)?,
            ..defaults.session.clone()
        };

        Ok(Self {
            server_url: lookup("COLLAB_SERVER_URL").unwrap_or(defaults.server_url),
            user_id: lookup("COLLAB_USER_ID").filter(|id| !id.is_empty()),
            display_name: lookup("COLLAB_DISPLAY_NAME").unwrap_or(defaults.display_name),
            session_id: lookup("COLLAB_SESSION_ID").unwrap_or(defaults.session_id),
            language: lookup("COLLAB_LANGUAGE").unwrap_or(defaults.language),
            execution_url: lookup("EXECUTION_URL").unwrap_or(defaults.execution_url),
            execution_timeout: millis("EXECUTION_TIMEOUT_MS", defaults.execution_timeout)?,
            reconnect_delay: millis("RECONNECT_DELAY_MS", defaults.reconnect_delay)?,
            session,
        })
    }

    /// Server URL carrying the participant identity as query parameters
    pub fn connect_url(&self, user_id: &str) -> Result<String, ConfigError> {
        let url = reqwest::Url::parse_with_params(
            &self.server_url,
            &[("userId", user_id), ("username", self.display_name.as_str())],
        )
        .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.server_url, e)))?;
        Ok(url.to_string())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            reconnect_delay: self.reconnect_delay,
            ..Default::default()
        }
    }
}
