//! Presence for collaboration sessions.
//!
//! This module handles ephemeral per-participant state that is never sent as
//! part of the shared buffer:
//! - Deterministic participant colours
//! - Typing indicators with a safety-net timeout

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::ParticipantId;

/// Palette participant colours are drawn from
pub const PALETTE: [&str; 14] = [
    "#3b82f6", // blue
    "#ef4444", // red
    "#22c55e", // green
    "#f59e0b", // amber
    "#8b5cf6", // violet
    "#ec4899", // pink
    "#06b6d4", // cyan
    "#f97316", // orange
    "#14b8a6", // teal
    "#a855f7", // purple
    "#84cc16", // lime
    "#6366f1", // indigo
    "#d946ef", // fuchsia
    "#0ea5e9", // sky
];

/// Colour for a participant, derived from its id.
///
/// Every client hashes the same id to the same palette entry, so colours agree
/// across peers without any coordination.
pub fn participant_color(participant_id: &str) -> &'static str {
    let digest = Sha256::digest(participant_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let idx = u64::from_be_bytes(prefix) % PALETTE.len() as u64;
    PALETTE[idx as usize]
}

/// Set of remote participants currently typing.
///
/// Each entry carries an expiry so a participant whose `stopTyping` never
/// arrives (abrupt disconnect) is cleared after `timeout`.
#[derive(Debug)]
pub struct TypingTracker {
    timeout: Duration,
    typing: HashMap<ParticipantId, Instant>,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            typing: HashMap::new(),
        }
    }

    /// Mark a participant as typing, refreshing its expiry.
    ///
    /// Returns true if the participant was idle before.
    pub fn start_typing(&mut self, participant_id: &str, now: Instant) -> bool {
        self.typing
            .insert(participant_id.to_string(), now + self.timeout)
            .is_none()
    }

    /// Returns true if the participant was typing
    pub fn stop_typing(&mut self, participant_id: &str) -> bool {
        self.typing.remove(participant_id).is_some()
    }

    /// Drop a participant that left the session
    pub fn remove(&mut self, participant_id: &str) -> bool {
        self.stop_typing(participant_id)
    }

    pub fn is_typing(&self, participant_id: &str) -> bool {
        self.typing.contains_key(participant_id)
    }

    /// Typing participant ids, sorted for stable display
    pub fn typing_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.typing.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Clear every entry whose expiry is at or before `now`.
    ///
    /// Returns the ids that were cleared.
    pub fn expire(&mut self, now: Instant) -> Vec<ParticipantId> {
        let expired: Vec<ParticipantId> = self
            .typing
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.typing.remove(id);
        }

        expired
    }

    /// Earliest pending expiry, if anyone is typing
    pub fn next_expiry(&self) -> Option<Instant> {
        self.typing.values().min().copied()
    }

    pub fn clear(&mut self) {
        self.typing.clear();
    }

    pub fn len(&self) -> usize {
        self.typing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.typing.is_empty()
    }
}
