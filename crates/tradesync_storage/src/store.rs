//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};
use std::sync::Arc;

/// Maximum length of a key in bytes.
pub const MAX_KEY_LEN: usize = 128;

/// A durable key-value store for the offline queue.
///
/// Stores are **opaque byte maps**. The sync engine owns the layout and
/// encoding of everything it writes; stores only keep bytes under keys.
///
/// # Invariants
///
/// - `get` returns exactly the bytes of the last successful `set` for a key
/// - A failed `set` leaves the previous value (or absence) untouched
/// - After `set` returns `Ok`, the value survives process termination
///   (for persistent implementations)
/// - Stores must be `Send + Sync`; methods take `&self` and synchronize
///   internally
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the read fails.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] if the value does not fit,
    /// or another error if the write fails.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the removal fails.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Lists all keys currently present, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }
}

/// Checks that `key` is usable by every store implementation.
///
/// Keys are 1..=[`MAX_KEY_LEN`] bytes of ASCII letters, digits, `.`, `_`
/// and `-`, and do not start with `.`. This keeps keys valid as file names.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] otherwise.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_namespaced_keys() {
        assert!(validate_key("tradesync.queue").is_ok());
        assert!(validate_key("journal-2_dead_letters").is_ok());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("spaced key").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
