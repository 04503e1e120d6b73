//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The write does not fit in the store's capacity.
    #[error("storage quota exceeded: requested {requested} bytes, {available} available")]
    QuotaExceeded {
        /// Total size the store would have after the write.
        requested: u64,
        /// Bytes still available before the write.
        available: u64,
    },

    /// The key is empty, too long or contains unsupported characters.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A stored value could not be read back.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store's lock.
    #[error("store is locked by another process")]
    Locked,
}

impl StorageError {
    /// Returns true if this error means the store ran out of space.
    pub fn is_capacity(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_is_capacity() {
        let err = StorageError::QuotaExceeded {
            requested: 10,
            available: 4,
        };
        assert!(err.is_capacity());
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn other_errors_are_not_capacity() {
        assert!(!StorageError::Locked.is_capacity());
        assert!(!StorageError::InvalidKey("a/b".into()).is_capacity());
        let err = StorageError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_capacity());
    }
}
