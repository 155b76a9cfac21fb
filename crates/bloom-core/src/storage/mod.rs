//! Local key-value storage backing the sync queue.
//!
//! The queue persists itself as a single JSON document under one key. Stores
//! only need to get, set and remove a string value.

mod memory;
mod migrations;
mod sqlite;

pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;

use crate::error::Result;

/// Trait for string key-value storage
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the value stored under `key`; missing keys are not an error
    fn remove(&self, key: &str) -> Result<()>;
}
