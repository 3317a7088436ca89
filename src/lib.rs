//! Client-side synchronizer for collaborative coding sessions.
//!
//! A participant joins a session over a persistent transport, edits a shared
//! code buffer, moves a cursor, chats, and sees the same from peers. The
//! crate provides:
//! - [`sync`]: session state, outbound broadcasting, inbound application,
//!   typing presence and the transport seam
//! - [`execution`]: a client for the remote code-execution service
//! - [`config`]: environment-driven client configuration

pub mod config;
pub mod execution;
pub mod sync;

pub use config::{ClientConfig, ConfigError};
pub use execution::{CodeExecutor, ExecutionError, ExecutionOutput, ExecutionRequest, HttpExecutor};
pub use sync::{
    CollabSession, SessionConfig, SessionError, SessionEvent, Transport, TransportError,
    WebSocketTransport,
};
