//! In-memory state of one collaboration session.
//!
//! `SessionStore` is the single source of truth for the local client's view:
//! shared code buffer, remote participants, per-participant cursors and
//! selections, and the chat transcript. Every operation is synchronous and
//! total; mutations arriving while no session is joined are ignored.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::presence::participant_color;
use super::protocol::{CursorPosition, ParticipantInfo, Selection};
use super::{ParticipantId, SessionId};

/// A connected user within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Derived from `id`, identical on every client
    pub color: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let color = participant_color(&id).to_string();
        Self {
            id,
            name: name.into(),
            color,
        }
    }

    /// Placeholder for a participant seen before its join notice
    fn placeholder(id: &str) -> Self {
        Self::new(id, id)
    }
}

impl From<ParticipantInfo> for Participant {
    fn from(info: ParticipantInfo) -> Self {
        Participant::new(info.id, info.username)
    }
}

/// One entry of the chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub author: ParticipantInfo,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Snapshot of a joined session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub code: String,
    pub language: String,
    /// Remote participants in arrival order
    pub participants: Vec<Participant>,
    pub cursors: HashMap<ParticipantId, CursorPosition>,
    pub selections: HashMap<ParticipantId, Selection>,
    pub chat: Vec<ChatMessage>,
}

impl Session {
    fn new(id: &str, language: &str) -> Self {
        Self {
            id: id.to_string(),
            language: language.to_string(),
            ..Default::default()
        }
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.participant(participant_id).is_some()
    }
}

/// Local store for the active session
#[derive(Debug)]
pub struct SessionStore {
    local_id: ParticipantId,
    session: Option<Session>,
    pending_broadcast: bool,
    chat_ids: HashSet<String>,
}

impl SessionStore {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            session: None,
            pending_broadcast: false,
            chat_ids: HashSet::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn is_joined(&self) -> bool {
        self.session.is_some()
    }

    /// Current code buffer (empty when not joined)
    pub fn code(&self) -> &str {
        self.session.as_ref().map(|s| s.code.as_str()).unwrap_or("")
    }

    /// Reset to an empty session shell.
    ///
    /// Joining the session that is already active keeps its state.
    pub fn join(&mut self, session_id: &str, language: &str) {
        if self.session_id() == Some(session_id) {
            return;
        }
        self.clear();
        self.session = Some(Session::new(session_id, language));
    }

    /// Clear all state; a no-op when nothing is joined
    pub fn leave(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.session = None;
        self.pending_broadcast = false;
        self.chat_ids.clear();
    }

    /// Overwrite the buffer with a local edit and flag it for broadcast
    pub fn apply_local_code_change(&mut self, text: &str) {
        if let Some(session) = self.session.as_mut() {
            session.code = text.to_string();
            self.pending_broadcast = true;
        }
    }

    pub fn has_pending_broadcast(&self) -> bool {
        self.pending_broadcast
    }

    /// Read and clear the pending-broadcast flag
    pub fn take_pending_broadcast(&mut self) -> bool {
        std::mem::take(&mut self.pending_broadcast)
    }

    /// Overwrite the buffer with a remote edit.
    ///
    /// Edits authored by the local participant are echoes of our own
    /// outbound messages and are ignored. Returns true if the buffer changed
    /// hands to the remote value.
    pub fn apply_remote_code_change(&mut self, text: &str, author_id: &str) -> bool {
        if author_id == self.local_id {
            return false;
        }
        match self.session.as_mut() {
            Some(session) => {
                session.code = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Upsert a cursor, creating the participant if it is not known yet
    pub fn set_cursor(&mut self, participant_id: &str, position: CursorPosition) {
        if let Some(session) = self.session.as_mut() {
            Self::ensure_participant(&self.local_id, session, participant_id);
            session.cursors.insert(participant_id.to_string(), position);
        }
    }

    /// Upsert a selection, creating the participant if it is not known yet
    pub fn set_selection(&mut self, participant_id: &str, selection: Selection) {
        if let Some(session) = self.session.as_mut() {
            Self::ensure_participant(&self.local_id, session, participant_id);
            session.selections.insert(participant_id.to_string(), selection);
        }
    }

    /// Create a placeholder participant for an id first seen through a
    /// presence signal. Returns true if one was created.
    pub fn touch_participant(&mut self, participant_id: &str) -> bool {
        match self.session.as_mut() {
            Some(session) => Self::ensure_participant(&self.local_id, session, participant_id),
            None => false,
        }
    }

    fn ensure_participant(local_id: &str, session: &mut Session, participant_id: &str) -> bool {
        if participant_id == local_id || session.has_participant(participant_id) {
            return false;
        }
        session.participants.push(Participant::placeholder(participant_id));
        true
    }

    /// Add a participant, or refresh its name if it was auto-created.
    ///
    /// Returns true if the participant was not present before.
    pub fn add_participant(&mut self, info: ParticipantInfo) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if info.id == self.local_id {
            return false;
        }
        match session.participants.iter_mut().find(|p| p.id == info.id) {
            Some(existing) => {
                existing.name = info.username;
                false
            }
            None => {
                session.participants.push(Participant::from(info));
                true
            }
        }
    }

    /// Remove a participant together with its cursor and selection
    pub fn remove_participant(&mut self, participant_id: &str) -> Option<Participant> {
        let session = self.session.as_mut()?;
        session.cursors.remove(participant_id);
        session.selections.remove(participant_id);
        let idx = session
            .participants
            .iter()
            .position(|p| p.id == participant_id)?;
        Some(session.participants.remove(idx))
    }

    /// Append to the transcript; replays of a known message id are ignored
    pub fn append_chat(&mut self, message: ChatMessage) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !self.chat_ids.insert(message.id.clone()) {
            return false;
        }
        session.chat.push(message);
        true
    }

    /// Replace buffer, language and participants from a server snapshot.
    ///
    /// Cursors and selections of participants missing from the snapshot are
    /// dropped. The chat transcript is kept. A local edit that has not been
    /// broadcast yet survives the snapshot and stays pending. Returns the ids
    /// of participants the snapshot removed.
    pub fn load_snapshot(
        &mut self,
        code: &str,
        language: &str,
        participants: Vec<ParticipantInfo>,
    ) -> Vec<ParticipantId> {
        let local_id = self.local_id.clone();
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if !self.pending_broadcast {
            session.code = code.to_string();
        }
        session.language = language.to_string();

        let incoming: Vec<Participant> = participants
            .into_iter()
            .filter(|p| p.id != local_id)
            .map(Participant::from)
            .collect();
        let known: HashSet<ParticipantId> = incoming.iter().map(|p| p.id.clone()).collect();
        let removed: Vec<ParticipantId> = session
            .participants
            .iter()
            .filter(|p| !known.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
        session.participants = incoming;

        session
            .cursors
            .retain(|id, _| *id == local_id || known.contains(id));
        session
            .selections
            .retain(|id, _| *id == local_id || known.contains(id));
        removed
    }

    pub fn participants(&self) -> &[Participant] {
        self.session
            .as_ref()
            .map(|s| s.participants.as_slice())
            .unwrap_or(&[])
    }

    pub fn cursor(&self, participant_id: &str) -> Option<CursorPosition> {
        self.session
            .as_ref()
            .and_then(|s| s.cursors.get(participant_id).copied())
    }

    pub fn selection(&self, participant_id: &str) -> Option<Selection> {
        self.session
            .as_ref()
            .and_then(|s| s.selections.get(participant_id).copied())
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        self.session
            .as_ref()
            .map(|s| s.chat.as_slice())
            .unwrap_or(&[])
    }
}
