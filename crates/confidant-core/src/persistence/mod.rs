//! Persistence layer for the six user collections.
//!
//! # Overview
//!
//! Every collection is one named key holding one whole JSON snapshot.
//! There are no partial writes, no cross-key transactions and no schema
//! version field.
//!
//! # Loading
//!
//! Loading never fails. [`try_load`] substitutes the caller's default when a
//! key is missing or its snapshot can't be read or parsed, and tags the
//! result so callers (and tests) can tell the two cases apart:
//!
//! ```ignore
//! let loaded = try_load(&port, StoreKey::Settings, Settings::default);
//! if loaded.used_default() { /* fresh install or corrupted file */ }
//! let settings = loaded.into_inner();
//! ```
//!
//! # Backends
//!
//! - [`JsonFileStore`] - one `<key>.json` file per key, atomic writes
//! - [`MemoryStore`] - in-process map for tests and throwaway runs

pub mod json_file;
pub mod memory;
pub mod types;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use types::*;

/// The durable keys, one per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKey {
    Identity,
    Memories,
    VoiceSamples,
    Conversations,
    CurrentSession,
    Settings,
}

impl StoreKey {
    pub const ALL: [StoreKey; 6] = [
        StoreKey::Identity,
        StoreKey::Memories,
        StoreKey::VoiceSamples,
        StoreKey::Conversations,
        StoreKey::CurrentSession,
        StoreKey::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Identity => "identity",
            StoreKey::Memories => "memories",
            StoreKey::VoiceSamples => "voice-samples",
            StoreKey::Conversations => "conversations",
            StoreKey::CurrentSession => "current-session",
            StoreKey::Settings => "settings",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for persistence backends.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error on {key}: {source}")]
    Io {
        key: StoreKey,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error on {key}: {source}")]
    Json {
        key: StoreKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A durable, synchronous key → JSON snapshot store.
pub trait PersistencePort: Send + Sync {
    /// Read the snapshot for `key`, `Ok(None)` if it was never written.
    fn load(&self, key: StoreKey) -> Result<Option<Value>, PersistenceError>;

    /// Replace the snapshot for `key`.
    fn save(&self, key: StoreKey, value: &Value) -> Result<(), PersistenceError>;
}

/// Why a collection started from its built-in default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Nothing stored under the key.
    Missing,
    /// Something was stored but couldn't be read or parsed.
    Corrupt(String),
}

/// Result of [`try_load`].
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    Stored(T),
    Defaulted(T, Fallback),
}

impl<T> Loaded<T> {
    pub fn used_default(&self) -> bool {
        matches!(self, Loaded::Defaulted(..))
    }

    pub fn fallback(&self) -> Option<&Fallback> {
        match self {
            Loaded::Stored(_) => None,
            Loaded::Defaulted(_, reason) => Some(reason),
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Loaded::Stored(value) | Loaded::Defaulted(value, _) => value,
        }
    }
}

/// Load `key` from `port`, falling back to `default()` on any failure.
pub fn try_load<T, F>(port: &dyn PersistencePort, key: StoreKey, default: F) -> Loaded<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let raw = match port.load(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            log::debug!("No stored {key}, using default");
            return Loaded::Defaulted(default(), Fallback::Missing);
        }
        Err(e) => {
            log::warn!("Could not read stored {key}, using default: {e}");
            return Loaded::Defaulted(default(), Fallback::Corrupt(e.to_string()));
        }
    };

    match serde_json::from_value(raw) {
        Ok(value) => Loaded::Stored(value),
        Err(e) => {
            log::warn!("Stored {key} has an unexpected shape, using default: {e}");
            Loaded::Defaulted(default(), Fallback::Corrupt(e.to_string()))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
