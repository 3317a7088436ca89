//! In-process relay server used by the integration tests.
//!
//! Speaks the session wire protocol: it stamps `authorId` on every relayed
//! event, answers `joinSession` with a snapshot and fans events out to every
//! member of the session, including the sender.

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use collab_session::sync::protocol::{
    InboundEvent, OutboundEvent, ParticipantInfo, ParticipantNotice, RemoteChatMessage,
    RemoteCodeChange, RemoteCursorMove, RemoteSelectionChange, SessionSnapshot, TypingNotice,
};
use collab_session::sync::transport::TransportConfig;
use collab_session::{CollabSession, SessionConfig, WebSocketTransport};

struct Member {
    info: ParticipantInfo,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Room {
    code: String,
    language: String,
    members: Vec<Member>,
}

#[derive(Default)]
pub struct Relay {
    rooms: Mutex<HashMap<String, Room>>,
}

impl Relay {
    fn join(&self, session_id: &str, language: &str, info: &ParticipantInfo, tx: &mpsc::UnboundedSender<String>) {
        let mut rooms = self.rooms.lock();
        let room = rooms.entry(session_id.to_string()).or_insert_with(|| Room {
            language: language.to_string(),
            ..Default::default()
        });
        room.members.retain(|m| m.info.id != info.id);

        let snapshot = InboundEvent::SessionSnapshot(SessionSnapshot {
            code: room.code.clone(),
            language: room.language.clone(),
            participants: room.members.iter().map(|m| m.info.clone()).collect(),
        });
        send(tx, &snapshot);

        let joined = InboundEvent::ParticipantJoined(ParticipantNotice {
            participant: info.clone(),
        });
        for member in &room.members {
            send(&member.tx, &joined);
        }
        room.members.push(Member {
            info: info.clone(),
            tx: tx.clone(),
        });
    }

    fn leave(&self, session_id: &str, info: &ParticipantInfo) {
        let mut rooms = self.rooms.lock();
        if let Some(room) = rooms.get_mut(session_id) {
            room.members.retain(|m| m.info.id != info.id);
            let left = InboundEvent::ParticipantLeft(ParticipantNotice {
                participant: info.clone(),
            });
            for member in &room.members {
                send(&member.tx, &left);
            }
        }
    }

    fn relay(&self, session_id: &str, event: InboundEvent, code: Option<String>) {
        let mut rooms = self.rooms.lock();
        if let Some(room) = rooms.get_mut(session_id) {
            if let Some(code) = code {
                room.code = code;
            }
            for member in &room.members {
                send(&member.tx, &event);
            }
        }
    }

    pub fn code(&self, session_id: &str) -> Option<String> {
        self.rooms.lock().get(session_id).map(|room| room.code.clone())
    }

    fn handle(
        &self,
        info: &ParticipantInfo,
        tx: &mpsc::UnboundedSender<String>,
        joined: &mut Option<String>,
        event: OutboundEvent,
    ) {
        let author_id = info.id.clone();
        match event {
            OutboundEvent::JoinSession { session_id, language } => {
                self.join(&session_id, &language, info, tx);
                *joined = Some(session_id);
            }
            OutboundEvent::LeaveSession { session_id } => {
                self.leave(&session_id, info);
                *joined = None;
            }
            OutboundEvent::CodeChange { session_id, code, .. } => {
                let event = InboundEvent::CodeChange(RemoteCodeChange {
                    author_id,
                    code: code.clone(),
                });
                self.relay(&session_id, event, Some(code));
            }
            OutboundEvent::CursorMove { session_id, position } => {
                let event = InboundEvent::CursorMove(RemoteCursorMove { author_id, position });
                self.relay(&session_id, event, None);
            }
            OutboundEvent::SelectionChange { session_id, selection } => {
                let event = InboundEvent::SelectionChange(RemoteSelectionChange { author_id, selection });
                self.relay(&session_id, event, None);
            }
            OutboundEvent::ChatMessage { session_id, text } => {
                let event = InboundEvent::ChatMessage(RemoteChatMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    author: info.clone(),
                    message: text,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
                self.relay(&session_id, event, None);
            }
            OutboundEvent::StartTyping { session_id } => {
                self.relay(&session_id, InboundEvent::StartTyping(TypingNotice { author_id }), None);
            }
            OutboundEvent::StopTyping { session_id } => {
                self.relay(&session_id, InboundEvent::StopTyping(TypingNotice { author_id }), None);
            }
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, event: &InboundEvent) {
    if let Ok(frame) = event.encode() {
        let _ = tx.send(frame);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(relay): State<Arc<Relay>>,
) -> impl IntoResponse {
    let info = ParticipantInfo::new(
        params.get("userId").cloned().unwrap_or_default(),
        params.get("username").cloned().unwrap_or_default(),
    );
    ws.on_upgrade(move |socket| handle_socket(socket, info, relay))
}

async fn handle_socket(socket: WebSocket, info: ParticipantInfo, relay: Arc<Relay>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut joined = None;
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                if let Ok(event) = OutboundEvent::decode(&text) {
                    relay.handle(&info, &tx, &mut joined, event);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(session_id) = joined {
        relay.leave(&session_id, &info);
    }
    writer.abort();
}

/// Start a relay on an ephemeral port
pub async fn spawn_relay() -> (SocketAddr, Arc<Relay>) {
    let relay = Arc::new(Relay::default());
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(relay.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, relay)
}

/// Connect a participant and join `session_id`
pub async fn join(
    addr: SocketAddr,
    id: &str,
    name: &str,
    session_id: &str,
    config: SessionConfig,
) -> (Arc<WebSocketTransport>, CollabSession) {
    let url = format!("ws://{}/ws?userId={}&username={}", addr, id, name);
    let transport = WebSocketTransport::connect(url, TransportConfig::default());
    transport.wait_connected(Duration::from_secs(5)).await.unwrap();

    let session = CollabSession::join(
        transport.clone(),
        ParticipantInfo::new(id, name),
        session_id,
        "javascript",
        config,
    )
    .unwrap();

    (transport, session)
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
