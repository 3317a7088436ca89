//! Inbound change application.
//!
//! Each inbound frame is decoded and dispatched to the matching store or
//! presence mutation. Frames authored by the local participant are echoes of
//! our own traffic and are filtered, except chat, which is always appended
//! (idempotently by message id). A frame that fails to decode is dropped and
//! logged; nothing here ever panics into the transport path.

use tokio::time::Instant;
use tracing::{debug, warn};

use super::presence::TypingTracker;
use super::protocol::{InboundEvent, ProtocolError};
use super::session::SessionEvent;
use super::store::{ChatMessage, Participant, SessionStore};

/// Counters for inbound traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Frames that changed local state
    pub applied: u64,
    /// Frames authored by the local participant
    pub echoes: u64,
    /// Frames that failed to decode or arrived with no joined session
    pub dropped: u64,
}

/// Dispatches inbound events to the session store and typing tracker
#[derive(Debug, Default)]
pub struct RemoteChangeApplier {
    stats: ApplyStats,
}

impl RemoteChangeApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ApplyStats {
        self.stats
    }

    /// Decode and apply one raw frame
    pub fn apply_frame(
        &mut self,
        store: &mut SessionStore,
        typing: &mut TypingTracker,
        frame: &str,
        now: Instant,
    ) -> Vec<SessionEvent> {
        match InboundEvent::decode(frame) {
            Ok(event) => self.apply(store, typing, event, now),
            Err(ProtocolError::UnknownEvent(name)) => {
                self.stats.dropped += 1;
                debug!("Ignoring unknown event: {}", name);
                Vec::new()
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!("Dropping malformed frame: {}", e);
                Vec::new()
            }
        }
    }

    /// Apply one decoded event. Returns the resulting session events.
    pub fn apply(
        &mut self,
        store: &mut SessionStore,
        typing: &mut TypingTracker,
        event: InboundEvent,
        now: Instant,
    ) -> Vec<SessionEvent> {
        if !store.is_joined() {
            self.stats.dropped += 1;
            debug!("Dropping {} with no joined session", event.kind());
            return Vec::new();
        }

        let local_id = store.local_id().to_string();
        let events = match event {
            InboundEvent::CodeChange(change) => {
                if change.author_id == local_id {
                    return self.echo();
                }
                store.apply_remote_code_change(&change.code, &change.author_id);
                vec![SessionEvent::CodeChanged {
                    author_id: change.author_id,
                    code: change.code,
                }]
            }

            InboundEvent::CursorMove(cursor) => {
                if cursor.author_id == local_id {
                    return self.echo();
                }
                let mut events = self.announce_if_new(store, &cursor.author_id);
                store.set_cursor(&cursor.author_id, cursor.position);
                events.push(SessionEvent::CursorMoved {
                    participant_id: cursor.author_id,
                    position: cursor.position,
                });
                events
            }

            InboundEvent::SelectionChange(selection) => {
                if selection.author_id == local_id {
                    return self.echo();
                }
                let mut events = self.announce_if_new(store, &selection.author_id);
                store.set_selection(&selection.author_id, selection.selection);
                events.push(SessionEvent::SelectionChanged {
                    participant_id: selection.author_id,
                    selection: selection.selection,
                });
                events
            }

            InboundEvent::ParticipantJoined(notice) => {
                let info = notice.participant;
                if info.id == local_id {
                    return self.echo();
                }
                let participant = Participant::from(info.clone());
                if store.add_participant(info) {
                    vec![SessionEvent::ParticipantJoined(participant)]
                } else {
                    // Auto-created earlier; the name may have been refreshed
                    Vec::new()
                }
            }

            InboundEvent::ParticipantLeft(notice) => {
                let participant_id = notice.participant.id;
                if participant_id == local_id {
                    return self.echo();
                }
                // Participant list and typing set change in the same step
                let removed = store.remove_participant(&participant_id).is_some();
                let was_typing = typing.remove(&participant_id);

                let mut events = Vec::new();
                if was_typing {
                    events.push(SessionEvent::TypingChanged {
                        participant_id: participant_id.clone(),
                        typing: false,
                    });
                }
                if removed {
                    events.push(SessionEvent::ParticipantLeft { participant_id });
                }
                events
            }

            InboundEvent::ChatMessage(chat) => {
                let message = ChatMessage {
                    id: chat.id,
                    author: chat.author,
                    text: chat.message,
                    timestamp: chat.timestamp,
                };
                if store.append_chat(message.clone()) {
                    vec![SessionEvent::ChatAppended(message)]
                } else {
                    debug!("Duplicate chat message {}", message.id);
                    Vec::new()
                }
            }

            InboundEvent::StartTyping(notice) => {
                if notice.author_id == local_id {
                    return self.echo();
                }
                let mut events = self.announce_if_new(store, &notice.author_id);
                store.touch_participant(&notice.author_id);
                if typing.start_typing(&notice.author_id, now) {
                    events.push(SessionEvent::TypingChanged {
                        participant_id: notice.author_id,
                        typing: true,
                    });
                }
                events
            }

            InboundEvent::StopTyping(notice) => {
                if notice.author_id == local_id {
                    return self.echo();
                }
                if typing.stop_typing(&notice.author_id) {
                    vec![SessionEvent::TypingChanged {
                        participant_id: notice.author_id,
                        typing: false,
                    }]
                } else {
                    Vec::new()
                }
            }

            InboundEvent::SessionSnapshot(snapshot) => {
                let removed =
                    store.load_snapshot(&snapshot.code, &snapshot.language, snapshot.participants);
                // Departed participants leave the typing set in the same step
                let mut events = Vec::new();
                for participant_id in removed {
                    if typing.remove(&participant_id) {
                        events.push(SessionEvent::TypingChanged {
                            participant_id: participant_id.clone(),
                            typing: false,
                        });
                    }
                    events.push(SessionEvent::ParticipantLeft { participant_id });
                }
                events.push(SessionEvent::SnapshotLoaded);
                events
            }
        };

        self.stats.applied += 1;
        events
    }

    fn echo(&mut self) -> Vec<SessionEvent> {
        self.stats.echoes += 1;
        Vec::new()
    }

    /// Event for a participant about to be auto-created by a cursor,
    /// selection or typing signal that overtook its join notice
    fn announce_if_new(&self, store: &SessionStore, participant_id: &str) -> Vec<SessionEvent> {
        match store.session() {
            Some(session) if !session.has_participant(participant_id) => {
                vec![SessionEvent::ParticipantJoined(Participant::new(
                    participant_id,
                    participant_id,
                ))]
            }
            _ => Vec::new(),
        }
    }
}
