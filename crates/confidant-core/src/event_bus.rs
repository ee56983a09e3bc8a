//! Broadcasting of lifecycle events.
//!
//! Every connection status transition, collection write and session
//! replacement is announced here, in order. Consumers that only need the
//! latest connection status should use
//! [`ConnectionManager::watch_status`](crate::connection::ConnectionManager::watch_status)
//! instead; this bus is for observers that must see each transition.
//!
//! # Example
//!
//! ```rust
//! use confidant_core::event_bus::{CompanionEvent, EventBus};
//! use confidant_core::ConnectionStatus;
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CompanionEvent::ConnectionStatus {
//!     status: ConnectionStatus::Connecting,
//! });
//!
//! assert!(matches!(
//!     rx.try_recv(),
//!     Ok(CompanionEvent::ConnectionStatus { status: ConnectionStatus::Connecting })
//! ));
//! ```

use serde::Serialize;
use tokio::sync::broadcast;

use crate::connection::ConnectionStatus;
use crate::ids::EntityId;
use crate::persistence::StoreKey;

/// Default channel capacity for the event bus.
/// Events beyond this capacity will cause slow subscribers to miss events (lag).
const DEFAULT_CAPACITY: usize = 256;

/// Something that happened inside the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CompanionEvent {
    /// The connection moved to a new status.
    ConnectionStatus { status: ConnectionStatus },

    /// A collection snapshot reached durable storage.
    CollectionSaved {
        #[serde(serialize_with = "serialize_key")]
        key: StoreKey,
    },

    /// A collection snapshot could not be written. In-memory state is kept.
    CollectionWriteFailed {
        #[serde(serialize_with = "serialize_key")]
        key: StoreKey,
        error: String,
    },

    /// The active session was replaced by a clear or a load.
    #[serde(rename_all = "camelCase")]
    SessionReplaced {
        session_id: EntityId,
        /// Archive entry created from the outgoing session, if any.
        archived_as: Option<EntityId>,
        /// Archive entry the new session was resumed from, if any.
        loaded_from: Option<EntityId>,
    },
}

fn serialize_key<S: serde::Serializer>(key: &StoreKey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(key.as_str())
}

/// Fan-out of [`CompanionEvent`]s to any number of subscribers.
///
/// Uses a tokio broadcast channel internally. Emitting with no subscribers
/// is fine; the event is dropped.
pub struct EventBus {
    sender: broadcast::Sender<CompanionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers that received the event.
    pub fn emit(&self, event: CompanionEvent) -> usize {
        log::trace!("event: {event:?}");
        self.sender.send(event).unwrap_or(0)
    }

    /// Past events are not delivered to new subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<CompanionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
