//! Persistent key-value storage
//!
//! The offline queue only needs `get`/`set` on a single key, so persistence
//! is abstracted behind [`KeyValueStore`]. Backends:
//!
//! - [`FileStore`]: one JSON file per key, atomic rename on write
//! - [`SqliteStore`]: one table, for kiosks that already ship SQLite
//! - [`MemoryStore`]: no durability, used for tests and degraded mode

mod error;
mod file;
mod sqlite;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use sqlite::SqliteStore;

/// Minimal persistence interface
///
/// `set` replaces the whole value for `key`; implementations must make the
/// replacement atomic with respect to `get`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
