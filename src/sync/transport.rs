//! Transport channel between the client and the real-time server.
//!
//! The server itself is an external collaborator; this module only consumes
//! its contract: emit an event, subscribe to inbound frames and connection
//! transitions, and report connection status. Two implementations exist:
//! - `WebSocketTransport`: tokio-tungstenite client with automatic reconnect
//! - `ChannelTransport`: in-process channels, for embedding and tests

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{OutboundEvent, ProtocolError};
use super::SessionId;

/// Transport errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport closed")]
    Closed,

    #[error("Timed out waiting for connection")]
    ConnectTimeout,

    #[error("Session {0} is already bound to this connection")]
    LeaseHeld(SessionId),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Events delivered to transport subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Raw inbound text frame
    Frame(String),
    /// Connection (re)established
    Connected,
    /// Connection lost
    Disconnected,
}

/// Binding between a connection and the one session using it
#[derive(Debug, Default)]
pub struct SessionLease {
    active: Mutex<Option<SessionId>>,
}

impl SessionLease {
    pub fn acquire(&self, session_id: &str) -> Result<(), TransportError> {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) => Err(TransportError::LeaseHeld(current.clone())),
            None => {
                *active = Some(session_id.to_string());
                Ok(())
            }
        }
    }

    /// Release the lease if `session_id` holds it
    pub fn release(&self, session_id: &str) {
        let mut active = self.active.lock();
        if active.as_deref() == Some(session_id) {
            *active = None;
        }
    }

    pub fn current(&self) -> Option<SessionId> {
        self.active.lock().clone()
    }
}

/// Contract consumed from the real-time channel
pub trait Transport: Send + Sync {
    /// Queue an event for sending. Never blocks.
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError>;

    /// Subscribe to inbound frames and connection transitions.
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    fn status(&self) -> ConnectionStatus;

    fn lease(&self) -> &SessionLease;

    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }
}

/// Settings for the WebSocket transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Capacity of the inbound event broadcast channel
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            event_capacity: 1024,
        }
    }
}

/// WebSocket transport with automatic reconnection.
///
/// A background task owns the socket. It forwards queued outbound frames,
/// publishes inbound text frames to subscribers, and reconnects after a
/// delay (plus jitter) whenever the connection drops.
pub struct WebSocketTransport {
    url: String,
    outgoing: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<TransportEvent>,
    status: Arc<RwLock<ConnectionStatus>>,
    lease: SessionLease,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketTransport {
    /// Start connecting to `url` in the background
    pub fn connect(url: impl Into<String>, config: TransportConfig) -> Arc<Self> {
        let url = url.into();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);
        let status = Arc::new(RwLock::new(ConnectionStatus::Connecting));

        let transport = Arc::new(Self {
            url: url.clone(),
            outgoing,
            events: events.clone(),
            status: status.clone(),
            lease: SessionLease::default(),
            shutdown_tx: shutdown_tx.clone(),
        });

        let connection = Connection {
            url,
            reconnect_delay: config.reconnect_delay,
            outgoing_rx,
            events,
            status,
            shutdown: shutdown_tx.subscribe(),
        };
        tokio::spawn(connection.run());

        transport
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait until the connection is up, or fail after `timeout`
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut events = self.events.subscribe();
        if self.is_connected() {
            return Ok(());
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Connected) => return Ok(()),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.is_connected() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
    }

    /// Close the socket and stop reconnecting
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Transport for WebSocketTransport {
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let frame = event.encode()?;
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    fn lease(&self) -> &SessionLease {
        &self.lease
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a connected socket stopped
enum Disconnect {
    Dropped,
    Shutdown,
}

/// Background task state for one WebSocket transport
struct Connection {
    url: String,
    reconnect_delay: Duration,
    outgoing_rx: mpsc::UnboundedReceiver<String>,
    events: broadcast::Sender<TransportEvent>,
    status: Arc<RwLock<ConnectionStatus>>,
    shutdown: broadcast::Receiver<()>,
}

impl Connection {
    async fn run(mut self) {
        loop {
            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!("Connected to {}", self.url);
                    *self.status.write() = ConnectionStatus::Connected;
                    let _ = self.events.send(TransportEvent::Connected);

                    let outcome = self.pump(stream).await;

                    let _ = self.events.send(TransportEvent::Disconnected);
                    if let Disconnect::Shutdown = outcome {
                        *self.status.write() = ConnectionStatus::Disconnected;
                        info!("Transport shut down");
                        return;
                    }
                    warn!("Connection to {} lost", self.url);
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", self.url, e);
                }
            }

            *self.status.write() = ConnectionStatus::Reconnecting;
            // Frames queued while offline belong to a state the server never saw
            loop {
                match self.outgoing_rx.try_recv() {
                    Ok(_) => continue,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        *self.status.write() = ConnectionStatus::Disconnected;
                        return;
                    }
                }
            }

            let delay = self.backoff();
            debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.recv() => {
                    *self.status.write() = ConnectionStatus::Disconnected;
                    info!("Transport shut down");
                    return;
                }
            }
        }
    }

    async fn pump(&mut self, stream: WsStream) -> Disconnect {
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                outgoing = self.outgoing_rx.recv() => match outgoing {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            return Disconnect::Dropped;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Disconnect::Shutdown;
                    }
                },
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let _ = self.events.send(TransportEvent::Frame(text));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            let _ = self.events.send(TransportEvent::Frame(text));
                        }
                        Err(_) => warn!("Dropping non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Disconnect::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        return Disconnect::Dropped;
                    }
                },
                _ = self.shutdown.recv() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Disconnect::Shutdown;
                }
            }
        }
    }

    fn backoff(&self) -> Duration {
        let base = self.reconnect_delay.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }
}

/// In-process transport backed by tokio channels.
///
/// Outbound events are delivered, typed, to the receiver returned from
/// [`ChannelTransport::new`]. Inbound frames and connection transitions are
/// injected by the owner.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    events: broadcast::Sender<TransportEvent>,
    connected: RwLock<bool>,
    lease: SessionLease,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);
        let transport = Arc::new(Self {
            outbound,
            events,
            connected: RwLock::new(true),
            lease: SessionLease::default(),
        });
        (transport, outbound_rx)
    }

    /// Deliver a raw inbound frame to subscribers
    pub fn inject(&self, frame: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Frame(frame.into()));
    }

    /// Flip the connection state and notify subscribers
    pub fn set_connected(&self, connected: bool) {
        *self.connected.write() = connected;
        let event = if connected {
            TransportEvent::Connected
        } else {
            TransportEvent::Disconnected
        };
        let _ = self.events.send(event);
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Transport for ChannelTransport {
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        if !*self.connected.read() {
            return Err(TransportError::NotConnected);
        }
        self.outbound.send(event).map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn status(&self) -> ConnectionStatus {
        if *self.connected.read() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    fn lease(&self) -> &SessionLease {
        &self.lease
    }
}
