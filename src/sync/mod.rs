//! Client-side synchronization for collaborative editing sessions.
//!
//! This module keeps one local view of a collaboration session in step with
//! its remote peers. It provides:
//! - A session state store (code buffer, participants, cursors, chat)
//! - Outbound change broadcasting with typing debounce
//! - Inbound change application with self-echo filtering
//! - Typing presence with timeout decay
//!
//! The code buffer is a whole-text snapshot with last-write-wins semantics.
//! Concurrent remote edits are not merged.

pub mod applier;
pub mod broadcaster;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;

pub use session::{CollabSession, SessionEvent};
pub use store::SessionStore;
pub use transport::{ChannelTransport, Transport, TransportError, WebSocketTransport};

use std::time::Duration;

/// Unique identifier for a collaboration session
pub type SessionId = String;

/// Unique identifier for a participant (stable per connection)
pub type ParticipantId = String;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session handle
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Transport already bound to session: {0}")]
    AlreadyActive(SessionId),

    #[error("Chat message is empty")]
    EmptyMessage,

    #[error("Session driver has stopped")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Timing and capacity settings for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after the last keystroke before `stopTyping` is sent
    pub typing_idle: Duration,
    /// Safety net for remote typing flags that never receive `stopTyping`
    pub typing_timeout: Duration,
    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_idle: Duration::from_millis(1000),
            typing_timeout: Duration::from_millis(4000),
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn with_typing_idle(mut self, idle: Duration) -> Self {
        self.typing_idle = idle;
        self
    }

    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::AlreadyActive("room-1".to_string());
        assert_eq!(err.to_string(), "Transport already bound to session: room-1");

        let err: SessionError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.typing_idle, Duration::from_millis(1000));
        assert!(config.typing_timeout >= Duration::from_secs(3));
        assert!(config.typing_timeout <= Duration::from_secs(5));
    }
}
