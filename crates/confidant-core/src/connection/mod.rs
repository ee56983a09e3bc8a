//! The link to the remote agent.
//!
//! [`ConnectionManager`] keeps one logical connection open, reconnecting on
//! a fixed interval (see [`policy`]) whenever it drops. It publishes the
//! current [`ConnectionStatus`] and, while connected, a [`ChannelHandle`]
//! for sending and receiving opaque payloads.
//!
//! ```text
//!               open ok                    close
//!  connecting ──────────▶ connected ───────────────┐
//!      ▲   │                  │ error              ▼
//!      │   │ open failed      ▼               disconnected
//!      │   └────────────▶   error ──close──▶      │
//!      │                                          │
//!      └──────────────── reconnect delay ◀────────┘
//! ```
//!
//! After [`ConnectionManager::teardown`] nothing is published any more.

pub mod manager;
pub mod memory;
pub mod policy;
pub mod transport;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

pub use manager::{ConnectionManager, ConnectionState};
pub use memory::{DeferredOpen, MemoryPeer, MemoryTransport};
pub use policy::{ExponentialBackoff, FixedDelay, ReconnectPolicy};
pub use transport::{Link, Transport, TransportError, WebSocketTransport};

/// Capacity of the inbound payload broadcast per connection.
const INBOUND_CAPACITY: usize = 256;

/// Connection status as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel {0} is closed")]
    Closed(u64),
}

/// Handle to one open connection.
///
/// Only valid until the next status change. Once the connection it was
/// issued for goes away, [`ChannelHandle::send`] returns
/// [`ChannelError::Closed`]; fetch a fresh handle after reconnecting.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    inbound: broadcast::Sender<String>,
}

impl ChannelHandle {
    pub(crate) fn open(generation: u64) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let handle = Self {
            generation,
            outbound,
            inbound,
        };
        (handle, outbound_rx)
    }

    /// Which connection this handle belongs to; increases on every connect.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a payload for the remote agent.
    pub fn send(&self, payload: impl Into<String>) -> Result<(), ChannelError> {
        self.outbound
            .send(payload.into())
            .map_err(|_| ChannelError::Closed(self.generation))
    }

    /// Payloads received from the remote agent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub(crate) fn deliver(&self, payload: String) {
        // No subscribers is fine: nobody is listening yet.
        let _ = self.inbound.send(payload);
    }
}
