//! File-backed persistence: one JSON file per collection.
//!
//! # File Structure
//!
//! ```text
//! {data_dir}/{key}.json
//! ```
//!
//! # Design Notes
//!
//! - **Atomic writes**: write `{key}.json.tmp`, then rename over `{key}.json`
//! - **Lazy directory creation**: the data dir is created on first save

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{PersistenceError, PersistencePort, StoreKey};

/// Stores each collection as `{dir}/{key}.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot file for `key`.
    pub fn path_for(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    fn temp_path_for(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", key.as_str()))
    }
}

impl PersistencePort for JsonFileStore {
    fn load(&self, key: StoreKey) -> Result<Option<Value>, PersistenceError> {
        let path = self.path_for(key);

        if !path.exists() {
            return Ok(None);
        }

        let contents =
            fs::read_to_string(&path).map_err(|source| PersistenceError::Io { key, source })?;
        let value = serde_json::from_str(&contents)
            .map_err(|source| PersistenceError::Json { key, source })?;

        Ok(Some(value))
    }

    /// # Atomic Write Strategy
    ///
    /// 1. Write to `{key}.json.tmp`
    /// 2. Rename to `{key}.json`
    ///
    /// An interrupted write leaves the previous snapshot intact.
    fn save(&self, key: StoreKey, value: &Value) -> Result<(), PersistenceError> {
        let io = |source: std::io::Error| PersistenceError::Io { key, source };

        fs::create_dir_all(&self.dir).map_err(io)?;

        let json = serde_json::to_string_pretty(value)
            .map_err(|source| PersistenceError::Json { key, source })?;
        let temp_path = self.temp_path_for(key);
        fs::write(&temp_path, json).map_err(io)?;
        fs::rename(&temp_path, self.path_for(key)).map_err(io)?;

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
