//! Outbound change broadcasting.
//!
//! Code changes, cursor moves and selections are sent as soon as they happen.
//! Code changes are whole-buffer snapshots, so the most recent message always
//! wins and no debounce is needed. The only timer lives in
//! [`TypingDebouncer`]: one trailing idle deadline that every keystroke
//! re-arms.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::protocol::{CursorPosition, EventKind, OutboundEvent, Selection};
use super::transport::Transport;
use super::SessionId;

/// Start/stop typing decisions for the local participant.
///
/// Holds a single deadline; a keystroke replaces it rather than adding a
/// second one, so `stopTyping` fires once per burst.
#[derive(Debug)]
pub struct TypingDebouncer {
    idle: Duration,
    deadline: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: None,
        }
    }

    /// Register a keystroke. Returns true if it starts a new burst.
    pub fn keystroke(&mut self, now: Instant) -> bool {
        let started = self.deadline.is_none();
        self.deadline = Some(now + self.idle);
        started
    }

    /// Returns true exactly once when the idle deadline has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the deadline. Returns true if a burst was open.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Counters for outbound traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub sent: u64,
    pub failed: u64,
}

/// Serializes local activity into outbound events for one session
pub struct ChangeBroadcaster {
    transport: Arc<dyn Transport>,
    session_id: SessionId,
    typing: TypingDebouncer,
    stats: BroadcastStats,
}

impl ChangeBroadcaster {
    pub fn new(transport: Arc<dyn Transport>, session_id: impl Into<String>, typing_idle: Duration) -> Self {
        Self {
            transport,
            session_id: session_id.into(),
            typing: TypingDebouncer::new(typing_idle),
            stats: BroadcastStats::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }

    pub fn join(&mut self, language: &str) -> bool {
        self.emit(OutboundEvent::JoinSession {
            session_id: self.session_id.clone(),
            language: language.to_string(),
        })
    }

    /// Close any open typing burst, then announce the leave
    pub fn leave(&mut self) {
        if self.typing.cancel() {
            self.emit(OutboundEvent::StopTyping {
                session_id: self.session_id.clone(),
            });
        }
        self.emit(OutboundEvent::LeaveSession {
            session_id: self.session_id.clone(),
        });
    }

    /// A local edit: typing signal first, then the whole buffer.
    ///
    /// Returns true if the buffer was handed to the transport.
    pub fn code_changed(&mut self, code: &str, cursor_offset: Option<usize>, now: Instant) -> bool {
        if self.typing.keystroke(now) {
            self.emit(OutboundEvent::StartTyping {
                session_id: self.session_id.clone(),
            });
        }
        self.send_code(code, cursor_offset)
    }

    /// Send the whole buffer again without touching typing state
    pub fn resend_code(&mut self, code: &str) -> bool {
        self.send_code(code, None)
    }

    fn send_code(&mut self, code: &str, cursor_offset: Option<usize>) -> bool {
        self.emit(OutboundEvent::CodeChange {
            session_id: self.session_id.clone(),
            code: code.to_string(),
            cursor_offset,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn cursor_moved(&mut self, position: CursorPosition) {
        self.emit(OutboundEvent::CursorMove {
            session_id: self.session_id.clone(),
            position,
        });
    }

    pub fn selection_changed(&mut self, selection: Selection) {
        self.emit(OutboundEvent::SelectionChange {
            session_id: self.session_id.clone(),
            selection,
        });
    }

    pub fn chat(&mut self, text: &str) -> bool {
        self.emit(OutboundEvent::ChatMessage {
            session_id: self.session_id.clone(),
            text: text.to_string(),
        })
    }

    /// Deadline of the open typing burst, if any
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    /// Send `stopTyping` if the idle deadline has passed
    pub fn poll_typing(&mut self, now: Instant) -> bool {
        if self.typing.poll(now) {
            self.emit(OutboundEvent::StopTyping {
                session_id: self.session_id.clone(),
            });
            return true;
        }
        false
    }

    /// Forget the open typing burst without sending anything
    pub fn reset_typing(&mut self) {
        self.typing.cancel();
    }

    fn emit(&mut self, event: OutboundEvent) -> bool {
        let kind: EventKind = event.kind();
        match self.transport.emit(event) {
            Ok(()) => {
                self.stats.sent += 1;
                debug!("Sent {} for session {}", kind, self.session_id);
                true
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!("Failed to send {} for session {}: {}", kind, self.session_id, e);
                false
            }
        }
    }
}
