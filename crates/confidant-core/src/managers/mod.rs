//! Core managers for Confidant state.
//!
//! These managers own in-memory state and persistence without any
//! framework-specific dependencies.

mod collection;
pub mod entity_store;

pub(crate) use collection::Collection;
pub use entity_store::{EntityStore, LoadReport};
