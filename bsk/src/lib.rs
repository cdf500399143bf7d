//! # Blockchain Streaming Kit (BSK)
//!
//! A multi-transport message bus that delivers ordered batches of blockchain
//! events from a producer to a stream consumer over one of several
//! interchangeable carriers (HTTP webhook, WebSocket, parent↔child process
//! IPC), plus the chain-tracking primitives the producer needs: a bounded
//! in-order block ring with reorg truncation and merkle verification of
//! candidate blocks.
//!
//! Every carrier implements the same [`Transport`] contract: heartbeat-based
//! liveness, at most one in-flight batch with correlation-id matched
//! acknowledgments, and graceful cancellation. The
//! [`outbox::OutboxStreamManager`] binds one transport by kind and forwards
//! batches to it, single-writer.

pub mod chain;
pub mod config;
pub mod context;
mod error;
pub mod heartbeat;
pub mod outbox;
pub mod query;
pub mod transport;

/// Re-export of the wire message crate.
pub use bsk_messages as messages;

pub use config::{HeartbeatConfig, HttpConfig, TransportConfig, WsConfig};
pub use error::{BuilderError, ChainError, Error, OutboxError, TransportError};
pub use outbox::{select_streaming_transport, OutboxStreamManager};

use async_trait::async_trait;
use bsk_messages::{AckPayload, Envelope};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The closed set of carrier kinds. The electron variants belong to another
/// runtime's embedding of the same channel contract; they parse but are not
/// buildable in this workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "ws")]
    Ws,
    #[serde(rename = "ipc-child")]
    IpcChild,
    #[serde(rename = "ipc-parent")]
    IpcParent,
    #[serde(rename = "electron-ipc-main")]
    ElectronIpcMain,
    #[serde(rename = "electron-ipc-renderer")]
    ElectronIpcRenderer,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            TransportKind::Http => "http",
            TransportKind::Ws => "ws",
            TransportKind::IpcChild => "ipc-child",
            TransportKind::IpcParent => "ipc-parent",
            TransportKind::ElectronIpcMain => "electron-ipc-main",
            TransportKind::ElectronIpcRenderer => "electron-ipc-renderer",
        };
        write!(f, "{}", tag)
    }
}

/// The uniform carrier contract.
///
/// Contracts every implementation honours:
/// - at most one acknowledgment in flight per transport; a second
///   `wait_for_ack` while one is pending fails with
///   [`TransportError::AnotherAckPending`];
/// - an incoming ack with an unknown correlation id is discarded, never
///   resolving a different waiter;
/// - the heartbeat loop never blocks on a send, and a failed tick retries
///   eagerly at the minimum interval.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn name(&self) -> &str;

    /// True iff the carrier is attached and a valid pong arrived within the
    /// configured staleness window.
    fn is_online(&self) -> bool;

    /// Polls for liveness, nudging the heartbeat to fire immediately; fails
    /// with [`TransportError::NotOnline`] at the deadline.
    async fn wait_for_online(&self, deadline: Duration) -> Result<(), TransportError>;

    /// Writes an object-form message to the carrier, assigning a correlation
    /// id when absent. Sending an `outboxStreamBatch` records its id as the
    /// batch currently in flight. Fails with
    /// [`TransportError::Disconnected`] when the carrier is not writable.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Writes a pre-serialised message verbatim. No correlation bookkeeping;
    /// the size cap still applies.
    async fn send_raw(&self, raw: &str) -> Result<(), TransportError>;

    /// Resolves the acknowledgment matching the batch currently in flight,
    /// consuming a pre-buffered ack when one arrived first. A timeout is
    /// terminal for that batch only.
    async fn wait_for_ack(&self, deadline: Duration) -> Result<AckPayload, TransportError>;

    /// Cancels the heartbeat, rejects a pending ack with
    /// [`TransportError::Destroyed`], and detaches listeners. Idempotent.
    async fn destroy(&self);
}
