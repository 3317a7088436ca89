//! Session driver tying the store, broadcaster, applier and presence
//! tracker to one transport.
//!
//! A joined session runs as a single tokio task. Local commands, inbound
//! frames and both timers (typing idle, typing timeout) are handled one at a
//! time inside its `select!` loop, so every mutation runs to completion
//! before the next one starts. Leaving ends the task: the transport
//! subscription and all deadlines are dropped before the store is cleared.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use super::applier::{ApplyStats, RemoteChangeApplier};
use super::broadcaster::{BroadcastStats, ChangeBroadcaster};
use super::presence::TypingTracker;
use super::protocol::{CursorPosition, ParticipantInfo, Selection};
use super::store::{ChatMessage, Participant, Session, SessionStore};
use super::transport::{Transport, TransportError, TransportEvent};
use super::{ParticipantId, SessionConfig, SessionError, SessionId, SessionResult};

/// Notifications emitted whenever the local view changes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Joined {
        session_id: SessionId,
    },
    CodeChanged {
        author_id: ParticipantId,
        code: String,
    },
    CursorMoved {
        participant_id: ParticipantId,
        position: CursorPosition,
    },
    SelectionChanged {
        participant_id: ParticipantId,
        selection: Selection,
    },
    ParticipantJoined(Participant),
    ParticipantLeft {
        participant_id: ParticipantId,
    },
    ChatAppended(ChatMessage),
    TypingChanged {
        participant_id: ParticipantId,
        typing: bool,
    },
    SnapshotLoaded,
    ConnectionChanged {
        connected: bool,
    },
    Left {
        session_id: SessionId,
    },
}

/// State shared between the driver task and the handle.
///
/// Only the driver and the handle's local-input methods write; each write
/// holds the lock for one complete mutation.
#[derive(Debug)]
struct SessionState {
    store: SessionStore,
    typing: TypingTracker,
    /// True while the transport is down; the view may be behind
    stale: bool,
}

enum Command {
    Edit {
        code: String,
        cursor_offset: Option<usize>,
    },
    Cursor(CursorPosition),
    Selection(Selection),
    Chat(String),
    Leave(oneshot::Sender<()>),
}

/// Counters for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub inbound: ApplyStats,
    pub outbound: BroadcastStats,
}

/// Handle to one joined collaboration session
pub struct CollabSession {
    session_id: SessionId,
    local: ParticipantInfo,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<RwLock<SessionStats>>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    driver: Option<JoinHandle<()>>,
}

impl CollabSession {
    /// Join `session_id` over `transport` and start the driver task.
    ///
    /// Fails if the transport is already bound to another session.
    pub fn join(
        transport: Arc<dyn Transport>,
        local: ParticipantInfo,
        session_id: impl Into<String>,
        language: impl Into<String>,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let session_id = session_id.into();
        let language = language.into();

        transport
            .lease()
            .acquire(&session_id)
            .map_err(|e| match e {
                TransportError::LeaseHeld(active) => SessionError::AlreadyActive(active),
                other => other.into(),
            })?;

        // Subscribe before announcing so no reply can slip past
        let inbound = transport.subscribe();

        let mut store = SessionStore::new(local.id.clone());
        store.join(&session_id, &language);
        let state = Arc::new(RwLock::new(SessionState {
            store,
            typing: TypingTracker::new(config.typing_timeout),
            stale: !transport.is_connected(),
        }));
        let stats = Arc::new(RwLock::new(SessionStats::default()));

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);

        let driver = Driver {
            broadcaster: ChangeBroadcaster::new(
                transport.clone(),
                session_id.clone(),
                config.typing_idle,
            ),
            applier: RemoteChangeApplier::new(),
            transport,
            session_id: session_id.clone(),
            language,
            state: state.clone(),
            stats: stats.clone(),
            events: events.clone(),
        };
        let handle = tokio::spawn(driver.run(command_rx, inbound));

        info!("Joined session {} as {}", session_id, local.id);

        Ok(Self {
            session_id,
            local,
            state,
            stats,
            commands,
            events,
            driver: Some(handle),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local(&self) -> &ParticipantInfo {
        &self.local
    }

    /// Subscribe to view changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// View changes as a stream
    pub fn events(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Replace the shared buffer with a local edit.
    ///
    /// The store is updated before this returns; the broadcast follows on
    /// the driver task.
    pub fn edit(&self, code: impl Into<String>, cursor_offset: Option<usize>) -> SessionResult<()> {
        let code = code.into();
        self.state.write().store.apply_local_code_change(&code);
        self.send(Command::Edit {
            code,
            cursor_offset,
        })
    }

    pub fn move_cursor(&self, position: CursorPosition) -> SessionResult<()> {
        self.state.write().store.set_cursor(&self.local.id, position);
        self.send(Command::Cursor(position))
    }

    pub fn select(&self, selection: Selection) -> SessionResult<()> {
        self.state.write().store.set_selection(&self.local.id, selection);
        self.send(Command::Selection(selection))
    }

    /// Send a chat message.
    ///
    /// The message shows up in the transcript when the server echoes it
    /// back with its assigned id.
    pub fn send_chat(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.send(Command::Chat(text))
    }

    /// Current buffer contents
    pub fn code(&self) -> String {
        self.state.read().store.code().to_string()
    }

    /// Copy of the whole session view
    pub fn snapshot(&self) -> Option<Session> {
        self.state.read().store.session().cloned()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.state.read().store.participants().to_vec()
    }

    pub fn typing_participants(&self) -> Vec<ParticipantId> {
        self.state.read().typing.typing_ids()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.state.read().store.transcript().to_vec()
    }

    pub fn is_stale(&self) -> bool {
        self.state.read().stale
    }

    pub fn stats(&self) -> SessionStats {
        *self.stats.read()
    }

    /// Leave the session and wait for the driver to tear down
    pub async fn leave(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Leave(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(handle) = self.driver.take() {
            let _ = handle.await;
        }
    }

    fn send(&self, command: Command) -> SessionResult<()> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

/// Task state behind a [`CollabSession`]
struct Driver {
    transport: Arc<dyn Transport>,
    broadcaster: ChangeBroadcaster,
    applier: RemoteChangeApplier,
    session_id: SessionId,
    language: String,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<RwLock<SessionStats>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: broadcast::Receiver<TransportEvent>,
    ) {
        self.broadcaster.join(&self.language);
        self.publish(SessionEvent::Joined {
            session_id: self.session_id.clone(),
        });
        self.record_stats();

        let mut inbound_open = true;
        let ack = loop {
            let typing_deadline = self.broadcaster.typing_deadline();
            let presence_deadline = self.state.read().typing.next_expiry();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Leave(ack)) => break Some(ack),
                    Some(command) => self.handle_command(command),
                    // Handle dropped without leaving
                    None => break None,
                },
                event = inbound.recv(), if inbound_open => match event {
                    Ok(event) => self.handle_transport(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Session {} skipped {} inbound frames, resyncing", self.session_id, skipped);
                        self.broadcaster.join(&self.language);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Transport closed under session {}", self.session_id);
                        inbound_open = false;
                        self.set_stale(true);
                    }
                },
                _ = sleep_until_deadline(typing_deadline) => {
                    self.broadcaster.poll_typing(Instant::now());
                }
                _ = sleep_until_deadline(presence_deadline) => {
                    self.expire_typing();
                }
            }
            self.record_stats();
        };

        // Unsubscribe first so no late frame can touch the torn-down view
        drop(inbound);
        self.teardown();
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Edit {
                code,
                cursor_offset,
            } => {
                if self.broadcaster.code_changed(&code, cursor_offset, Instant::now()) {
                    self.state.write().store.take_pending_broadcast();
                }
                self.publish(SessionEvent::CodeChanged {
                    author_id: self.state.read().store.local_id().to_string(),
                    code,
                });
            }
            Command::Cursor(position) => self.broadcaster.cursor_moved(position),
            Command::Selection(selection) => self.broadcaster.selection_changed(selection),
            Command::Chat(text) => {
                self.broadcaster.chat(&text);
            }
            // Handled by the run loop
            Command::Leave(_) => {}
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => {
                let events = {
                    let mut state = self.state.write();
                    let SessionState { store, typing, .. } = &mut *state;
                    self.applier.apply_frame(store, typing, &frame, Instant::now())
                };
                let resynced = events.contains(&SessionEvent::SnapshotLoaded);
                for event in events {
                    self.publish(event);
                }
                if resynced {
                    self.flush_pending_edit();
                }
            }
            TransportEvent::Connected => {
                if self.state.read().stale {
                    info!("Reconnected, rejoining session {}", self.session_id);
                    // Typing state from before the drop is meaningless now
                    self.broadcaster.reset_typing();
                    self.broadcaster.join(&self.language);
                    self.set_stale(false);
                }
            }
            TransportEvent::Disconnected => {
                warn!("Session {} lost its connection", self.session_id);
                self.set_stale(true);
            }
        }
    }

    /// Send a local edit the server has not seen, e.g. one made offline
    fn flush_pending_edit(&mut self) {
        let pending = {
            let state = self.state.read();
            state
                .store
                .has_pending_broadcast()
                .then(|| state.store.code().to_string())
        };
        if let Some(code) = pending {
            debug!("Resending unsent edit for session {}", self.session_id);
            if self.broadcaster.resend_code(&code) {
                self.state.write().store.take_pending_broadcast();
            }
        }
    }

    fn expire_typing(&mut self) {
        let expired = self.state.write().typing.expire(Instant::now());
        for participant_id in expired {
            debug!("Typing timed out for {}", participant_id);
            self.publish(SessionEvent::TypingChanged {
                participant_id,
                typing: false,
            });
        }
    }

    fn set_stale(&self, stale: bool) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.stale != stale;
            state.stale = stale;
            changed
        };
        if changed {
            self.publish(SessionEvent::ConnectionChanged { connected: !stale });
        }
    }

    fn teardown(&mut self) {
        self.broadcaster.leave();
        {
            let mut state = self.state.write();
            state.typing.clear();
            state.store.leave();
        }
        self.transport.lease().release(&self.session_id);
        self.record_stats();
        self.publish(SessionEvent::Left {
            session_id: self.session_id.clone(),
        });
        info!("Left session {}", self.session_id);
    }

    fn record_stats(&self) {
        *self.stats.write() = SessionStats {
            inbound: self.applier.stats(),
            outbound: self.broadcaster.stats(),
        };
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
