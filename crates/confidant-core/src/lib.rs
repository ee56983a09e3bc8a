//! # confidant-core
//!
//! Client-side core of Confidant, the companion app frontend.
//!
//! This crate is framework-agnostic and can be used by:
//! - the desktop shell (via commands)
//! - `confidant-daemon` (stdin/stdout automation)
//!
//! ## Key Concepts
//!
//! - **Session**: the single active conversation, never absent
//! - **Conversation**: an archived session, newest first, capped at 50
//! - **Collection**: one independently persisted piece of user state
//! - **ConnectionManager**: the reconnecting link to the remote agent

pub mod config;
pub mod connection;
pub mod context;
pub mod event_bus;
pub mod ids;
pub mod logging;
pub mod managers;
pub mod paths;
pub mod persistence;
pub mod session;

// Re-export commonly used types
pub use config::{ConnectionConfig, Endpoint};
pub use connection::{ChannelHandle, ConnectionManager, ConnectionStatus};
pub use context::{CompanionContext, CompanionContextBuilder};
pub use event_bus::{CompanionEvent, EventBus};
pub use ids::{EntityId, IdGenerator};
pub use managers::EntityStore;
pub use session::SessionManager;
