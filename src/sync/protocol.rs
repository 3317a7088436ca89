//! JSON event protocol spoken over the transport channel.
//!
//! Every frame is a JSON object of the form `{"event": <name>, "data": {...}}`
//! with camelCase field names. Outbound events are typed and encoded with
//! serde; inbound frames are decoded in two steps (envelope, then payload) so
//! that an unknown event and a malformed payload can be told apart and
//! logged separately.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ParticipantId, SessionId};

/// Event names carried in the `event` field of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Session lifecycle
    JoinSession,
    LeaveSession,
    SessionSnapshot,

    // Shared buffer and cursors
    CodeChange,
    CursorMove,
    SelectionChange,

    // Participants
    ParticipantJoined,
    ParticipantLeft,

    // Chat
    ChatMessage,

    // Typing presence
    StartTyping,
    StopTyping,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JoinSession => "joinSession",
            EventKind::LeaveSession => "leaveSession",
            EventKind::SessionSnapshot => "sessionSnapshot",
            EventKind::CodeChange => "codeChange",
            EventKind::CursorMove => "cursorMove",
            EventKind::SelectionChange => "selectionChange",
            EventKind::ParticipantJoined => "participantJoined",
            EventKind::ParticipantLeft => "participantLeft",
            EventKind::ChatMessage => "chatMessage",
            EventKind::StartTyping => "startTyping",
            EventKind::StopTyping => "stopTyping",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "joinSession" => Ok(EventKind::JoinSession),
            "leaveSession" => Ok(EventKind::LeaveSession),
            "sessionSnapshot" => Ok(EventKind::SessionSnapshot),
            "codeChange" => Ok(EventKind::CodeChange),
            "cursorMove" => Ok(EventKind::CursorMove),
            "selectionChange" => Ok(EventKind::SelectionChange),
            "participantJoined" => Ok(EventKind::ParticipantJoined),
            "participantLeft" => Ok(EventKind::ParticipantLeft),
            "chatMessage" => Ok(EventKind::ChatMessage),
            "startTyping" => Ok(EventKind::StartTyping),
            "stopTyping" => Ok(EventKind::StopTyping),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// Protocol errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON frame: {0}")]
    InvalidJson(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: EventKind, reason: String },

    #[error("Event {0} is outbound only")]
    UnexpectedDirection(EventKind),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Cursor position in the shared buffer (0-based line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Selected range in the shared buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub start: CursorPosition,
    pub end: CursorPosition,
}

impl Selection {
    pub fn new(start: CursorPosition, end: CursorPosition) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Participant identity as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub username: String,
}

impl ParticipantInfo {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// Events sent from this client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum OutboundEvent {
    JoinSession {
        session_id: SessionId,
        language: String,
    },
    LeaveSession {
        session_id: SessionId,
    },
    CodeChange {
        session_id: SessionId,
        code: String,
        cursor_offset: Option<usize>,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },
    CursorMove {
        session_id: SessionId,
        position: CursorPosition,
    },
    SelectionChange {
        session_id: SessionId,
        selection: Selection,
    },
    ChatMessage {
        session_id: SessionId,
        text: String,
    },
    StartTyping {
        session_id: SessionId,
    },
    StopTyping {
        session_id: SessionId,
    },
}

impl OutboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::JoinSession { .. } => EventKind::JoinSession,
            OutboundEvent::LeaveSession { .. } => EventKind::LeaveSession,
            OutboundEvent::CodeChange { .. } => EventKind::CodeChange,
            OutboundEvent::CursorMove { .. } => EventKind::CursorMove,
            OutboundEvent::SelectionChange { .. } => EventKind::SelectionChange,
            OutboundEvent::ChatMessage { .. } => EventKind::ChatMessage,
            OutboundEvent::StartTyping { .. } => EventKind::StartTyping,
            OutboundEvent::StopTyping { .. } => EventKind::StopTyping,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            OutboundEvent::JoinSession { session_id, .. }
            | OutboundEvent::LeaveSession { session_id }
            | OutboundEvent::CodeChange { session_id, .. }
            | OutboundEvent::CursorMove { session_id, .. }
            | OutboundEvent::SelectionChange { session_id, .. }
            | OutboundEvent::ChatMessage { session_id, .. }
            | OutboundEvent::StartTyping { session_id }
            | OutboundEvent::StopTyping { session_id } => session_id,
        }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode a JSON text frame produced by [`OutboundEvent::encode`]
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCodeChange {
    pub author_id: ParticipantId,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCursorMove {
    pub author_id: ParticipantId,
    pub position: CursorPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSelectionChange {
    pub author_id: ParticipantId,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantNotice {
    pub participant: ParticipantInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChatMessage {
    pub id: String,
    pub author: ParticipantInfo,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub author_id: ParticipantId,
}

/// Full session state pushed by the server on join or rejoin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub participants: Vec<ParticipantInfo>,
}

/// Events received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    CodeChange(RemoteCodeChange),
    CursorMove(RemoteCursorMove),
    SelectionChange(RemoteSelectionChange),
    ParticipantJoined(ParticipantNotice),
    ParticipantLeft(ParticipantNotice),
    ChatMessage(RemoteChatMessage),
    StartTyping(TypingNotice),
    StopTyping(TypingNotice),
    SessionSnapshot(SessionSnapshot),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::CodeChange(_) => EventKind::CodeChange,
            InboundEvent::CursorMove(_) => EventKind::CursorMove,
            InboundEvent::SelectionChange(_) => EventKind::SelectionChange,
            InboundEvent::ParticipantJoined(_) => EventKind::ParticipantJoined,
            InboundEvent::ParticipantLeft(_) => EventKind::ParticipantLeft,
            InboundEvent::ChatMessage(_) => EventKind::ChatMessage,
            InboundEvent::StartTyping(_) => EventKind::StartTyping,
            InboundEvent::StopTyping(_) => EventKind::StopTyping,
            InboundEvent::SessionSnapshot(_) => EventKind::SessionSnapshot,
        }
    }

    /// Decode an inbound JSON text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        #[derive(Deserialize)]
        struct Envelope {
            event: String,
            #[serde(default)]
            data: serde_json::Value,
        }

        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let kind: EventKind = envelope.event.parse()?;
        let data = envelope.data;

        match kind {
            EventKind::CodeChange => payload(kind, data).map(InboundEvent::CodeChange),
            EventKind::CursorMove => payload(kind, data).map(InboundEvent::CursorMove),
            EventKind::SelectionChange => payload(kind, data).map(InboundEvent::SelectionChange),
            EventKind::ParticipantJoined => {
                payload(kind, data).map(InboundEvent::ParticipantJoined)
            }
            EventKind::ParticipantLeft => payload(kind, data).map(InboundEvent::ParticipantLeft),
            EventKind::ChatMessage => payload(kind, data).map(InboundEvent::ChatMessage),
            EventKind::StartTyping => payload(kind, data).map(InboundEvent::StartTyping),
            EventKind::StopTyping => payload(kind, data).map(InboundEvent::StopTyping),
            EventKind::SessionSnapshot => payload(kind, data).map(InboundEvent::SessionSnapshot),
            EventKind::JoinSession | EventKind::LeaveSession => {
                Err(ProtocolError::UnexpectedDirection(kind))
            }
        }
    }

    /// Encode as a JSON text frame (used by servers and test fixtures)
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match self {
            InboundEvent::CodeChange(p) => serde_json::to_value(p),
            InboundEvent::CursorMove(p) => serde_json::to_value(p),
            InboundEvent::SelectionChange(p) => serde_json::to_value(p),
            InboundEvent::ParticipantJoined(p) | InboundEvent::ParticipantLeft(p) => {
                serde_json::to_value(p)
            }
            InboundEvent::ChatMessage(p) => serde_json::to_value(p),
            InboundEvent::StartTyping(p) | InboundEvent::StopTyping(p) => serde_json::to_value(p),
            InboundEvent::SessionSnapshot(p) => serde_json::to_value(p),
        }
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

        let frame = serde_json::json!({ "event": self.kind().as_str(), "data": data });
        Ok(frame.to_string())
    }
}

fn payload<T>(event: EventKind, data: serde_json::Value) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        event,
        reason: e.to_string(),
    })
}
