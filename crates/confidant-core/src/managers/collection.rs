//! A single persisted collection.
//!
//! Holds the in-memory value behind a mutex and mirrors every committed
//! change to the persistence port. The write happens while the lock is
//! held, so writes for one key reach storage in commit order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::event_bus::{CompanionEvent, EventBus};
use crate::persistence::{try_load, Fallback, PersistencePort, StoreKey};

/// Shared write path for all collections of one store.
pub(crate) struct Persister {
    port: Arc<dyn PersistencePort>,
    events: Arc<EventBus>,
    write_failures: AtomicU64,
}

impl Persister {
    pub(crate) fn new(port: Arc<dyn PersistencePort>, events: Arc<EventBus>) -> Self {
        Self {
            port,
            events,
            write_failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn port(&self) -> &dyn PersistencePort {
        self.port.as_ref()
    }

    pub(crate) fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub(crate) fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Best effort: failures are logged and announced, never returned.
    fn save<T: Serialize>(&self, key: StoreKey, value: &T) {
        let result = serde_json::to_value(value)
            .map_err(|e| e.to_string())
            .and_then(|json| self.port.save(key, &json).map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                log::debug!("Saved {key}");
                self.events.emit(CompanionEvent::CollectionSaved { key });
            }
            Err(error) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to save {key}, keeping in-memory state: {error}");
                self.events
                    .emit(CompanionEvent::CollectionWriteFailed { key, error });
            }
        }
    }
}

/// One named collection with commit-triggers-persist semantics.
pub(crate) struct Collection<T> {
    key: StoreKey,
    value: Mutex<T>,
    persister: Arc<Persister>,
}

impl<T> Collection<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Load from storage, or start from `default()` if absent or corrupt.
    pub(crate) fn open(
        key: StoreKey,
        persister: Arc<Persister>,
        default: impl FnOnce() -> T,
    ) -> (Self, Option<Fallback>) {
        let loaded = try_load(persister.port(), key, default);
        let fallback = loaded.fallback().cloned();
        let collection = Self {
            key,
            value: Mutex::new(loaded.into_inner()),
            persister,
        };
        (collection, fallback)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        // A panic mid-update never leaves a half-applied value behind
        // (updates run on a copy), so a poisoned lock is still consistent.
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current value.
    pub(crate) fn get(&self) -> T {
        self.lock().clone()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    /// Replace the whole value and persist it.
    pub(crate) fn replace(&self, value: T) {
        let mut guard = self.lock();
        *guard = value;
        self.persister.save(self.key, &*guard);
    }

    /// Derive a new value from a copy of the current one.
    ///
    /// `f` returning `None` discards the copy: nothing is committed and
    /// nothing is written.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> Option<R>) -> Option<R> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        *guard = next;
        self.persister.save(self.key, &*guard);
        Some(out)
    }
}
