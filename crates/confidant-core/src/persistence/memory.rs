//! In-process persistence for tests and throwaway runs.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::{PersistenceError, PersistencePort, StoreKey};

/// Keeps snapshots in a map. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, Value>>,
    saves: Mutex<Vec<StoreKey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a snapshot without counting it as a save.
    pub fn with_entry(self, key: StoreKey, value: Value) -> Self {
        self.entries.lock().unwrap().insert(key, value);
        self
    }

    /// Current snapshot for `key`.
    pub fn snapshot(&self, key: StoreKey) -> Option<Value> {
        self.entries.lock().unwrap().get(&key).cloned()
    }

    /// Every key passed to `save`, in call order.
    pub fn save_log(&self) -> Vec<StoreKey> {
        self.saves.lock().unwrap().clone()
    }
}

impl PersistencePort for MemoryStore {
    fn load(&self, key: StoreKey) -> Result<Option<Value>, PersistenceError> {
        Ok(self.snapshot(key))
    }

    fn save(&self, key: StoreKey, value: &Value) -> Result<(), PersistenceError> {
        self.entries.lock().unwrap().insert(key, value.clone());
        self.saves.lock().unwrap().push(key);
        Ok(())
    }
}
