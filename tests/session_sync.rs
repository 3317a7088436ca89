mod common;

use std::time::Duration;

use collab_session::sync::protocol::{CursorPosition, ParticipantInfo};
use collab_session::sync::transport::TransportConfig;
use collab_session::{CollabSession, SessionConfig, SessionEvent, Transport, WebSocketTransport};
use common::{eventually, join, spawn_relay};

fn quick_typing() -> SessionConfig {
    SessionConfig::default().with_typing_idle(Duration::from_millis(100))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_clients_converge_on_last_write() {
    let (addr, relay) = spawn_relay().await;
    let (_ta, alice) = join(addr, "alice", "Alice", "S1", SessionConfig::default()).await;
    let (_tb, bob) = join(addr, "bob", "Bob", "S1", SessionConfig::default()).await;

    eventually("alice to see bob", || {
        alice.participants().iter().any(|p| p.id == "bob")
    })
    .await;
    eventually("bob to see alice", || {
        bob.participants().iter().any(|p| p.id == "alice")
    })
    .await;

    alice.edit("x=1", Some(3)).unwrap();
    eventually("bob to receive x=1", || bob.code() == "x=1").await;

    bob.edit("x=2", Some(3)).unwrap();
    eventually("both to hold x=2", || alice.code() == "x=2" && bob.code() == "x=2").await;
    assert_eq!(relay.code("S1").as_deref(), Some("x=2"));

    alice.leave().await;
    bob.leave().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_joiner_receives_snapshot() {
    let (addr, relay) = spawn_relay().await;
    let (_ta, alice) = join(addr, "alice", "Alice", "S1", SessionConfig::default()).await;
    alice.edit("print('hi')", None).unwrap();

    // Let the edit reach the relay before bob joins
    eventually("relay to store the edit", || relay.code("S1").as_deref() == Some("print('hi')"))
        .await;

    let (_tb, bob) = join(addr, "bob", "Bob", "S1", SessionConfig::default()).await;
    eventually("bob to load the snapshot", || bob.code() == "print('hi')").await;
    assert!(bob.participants().iter().any(|p| p.id == "alice"));
    assert!(bob.participants().iter().all(|p| p.id != "bob"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chat_is_delivered_once_to_everyone() {
    let (addr, _relay) = spawn_relay().await;
    let (_ta, alice) = join(addr, "alice", "Alice", "S1", SessionConfig::default()).await;
    let (_tb, bob) = join(addr, "bob", "Bob", "S1", SessionConfig::default()).await;
    eventually("alice to see bob", || alice.participants().len() == 1).await;

    alice.send_chat("hello").unwrap();
    eventually("both transcripts", || {
        alice.transcript().len() == 1 && bob.transcript().len() == 1
    })
    .await;

    let message = &bob.transcript()[0];
    assert_eq!(message.text, "hello");
    assert_eq!(message.author, ParticipantInfo::new("alice", "Alice"));
    assert_eq!(alice.transcript()[0].id, message.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cursor_and_typing_reach_peer() {
    let (addr, _relay) = spawn_relay().await;
    let (_ta, alice) = join(addr, "alice", "Alice", "S1", quick_typing()).await;
    let (_tb, bob) = join(addr, "bob", "Bob", "S1", quick_typing()).await;
    eventually("bob to see alice", || bob.participants().len() == 1).await;

    alice.move_cursor(CursorPosition::new(3, 7)).unwrap();
    eventually("bob to see alice's cursor", || {
        bob.snapshot()
            .and_then(|s| s.cursors.get("alice").copied())
            == Some(CursorPosition::new(3, 7))
    })
    .await;

    alice.edit("a", Some(1)).unwrap();
    eventually("bob to see alice typing", || {
        bob.typing_participants() == vec!["alice".to_string()]
    })
    .await;
    eventually("alice's burst to end", || bob.typing_participants().is_empty()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_leave_is_announced_to_peers() {
    let (addr, _relay) = spawn_relay().await;
    let (_ta, alice) = join(addr, "alice", "Alice", "S1", SessionConfig::default()).await;
    let (_tb, bob) = join(addr, "bob", "Bob", "S1", SessionConfig::default()).await;
    eventually("alice to see bob", || alice.participants().len() == 1).await;

    let mut events = alice.subscribe();
    bob.leave().await;

    eventually("alice to drop bob", || alice.participants().is_empty()).await;
    let mut saw_left = false;
    while let Ok(event) = events.try_recv() {
        if event == (SessionEvent::ParticipantLeft { participant_id: "bob".to_string() }) {
            saw_left = true;
        }
    }
    assert!(saw_left);
}

#[tokio::test]
async fn test_offline_join_keeps_local_edits() {
    let transport = WebSocketTransport::connect(
        "ws://127.0.0.1:9/ws",
        TransportConfig {
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        },
    );

    let session = CollabSession::join(
        transport.clone(),
        ParticipantInfo::new("alice", "Alice"),
        "S1",
        "python",
        SessionConfig::default(),
    )
    .unwrap();

    assert!(session.is_stale());
    session.edit("draft", None).unwrap();
    assert_eq!(session.code(), "draft");

    session.leave().await;
    transport.shutdown();
    assert!(transport.lease().current().is_none());
}
