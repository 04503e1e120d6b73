//! In-memory key-value store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests (share it through `Arc` to simulate a restart)
/// - Ephemeral sessions that don't need persistence
///
/// An optional capacity emulates a browser storage quota: a `set` that would
/// push the total size of keys and values past it fails with
/// [`StorageError::QuotaExceeded`].
///
/// # Example
///
/// ```rust
/// use tradesync_storage::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::with_capacity(8);
/// assert!(store.set("k", b"1234567").is_ok());
/// assert!(store.set("k", b"12345678").is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    capacity: Option<u64>,
}

impl InMemoryStore {
    /// Creates a new empty store with no capacity limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty store limited to `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the total size of keys and values in bytes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        used_bytes(&self.entries.read())
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

fn used_bytes(entries: &BTreeMap<String, Vec<u8>>) -> u64 {
    entries
        .iter()
        .map(|(k, v)| (k.len() + v.len()) as u64)
        .sum()
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let mut entries = self.entries.write();

        if let Some(capacity) = self.capacity {
            let current = used_bytes(&entries);
            let replaced = entries
                .get(key)
                .map(|v| (key.len() + v.len()) as u64)
                .unwrap_or(0);
            let requested = current - replaced + (key.len() + value.len()) as u64;
            if requested > capacity {
                return Err(StorageError::QuotaExceeded {
                    requested,
                    available: capacity.saturating_sub(current),
                });
            }
        }

        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
