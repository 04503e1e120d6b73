//! Error types for the sync engine.

use crate::context::ErrorContext;
use thiserror::Error;
use tradesync_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// An error reported by a [`crate::RemoteStore`].
///
/// Remote stores tag their failures at the boundary so the engine does not
/// have to guess. `Other` is reserved for third-party errors that cannot be
/// tagged; those are classified by message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote store could not be reached at all.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within its timeout.
    #[error("remote call timed out")]
    Timeout,

    /// A failure expected to resolve on retry (rate limit, 503, reset).
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// A failure retrying will not fix (validation, authorization).
    #[error("permanent remote failure: {0}")]
    Permanent(String),

    /// An untagged failure.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Creates an unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Creates an untagged error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns true if the remote store was not reachable at all.
    ///
    /// Such failures say nothing about the operation being delivered.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }
}

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A single remote call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A retried unit of work gave up.
    #[error("{} failed after {attempts} attempt(s): {source}", .context.operation_name)]
    Failed {
        /// Diagnostics for the failed work.
        context: Box<ErrorContext>,
        /// Number of invocations made.
        attempts: u32,
        /// The final error.
        #[source]
        source: RemoteError,
    },

    /// The local store failed.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// The local store is out of space; the operation was not queued.
    #[error("local storage full: {0}")]
    Capacity(StorageError),

    /// A persisted document could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// No queued operation has this id.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A retried unit of work that gave up.
///
/// Returned by [`crate::retry_operation`]; `source` is the error of the last
/// invocation.
#[derive(Error, Debug)]
#[error("{} failed after {attempts} attempt(s): {source}", .context.operation_name)]
pub struct RetryError<E> {
    /// Diagnostics for the failed work.
    pub context: Box<ErrorContext>,
    /// Number of invocations made.
    pub attempts: u32,
    /// The final error.
    #[source]
    pub source: E,
}

impl From<RetryError<RemoteError>> for SyncError {
    fn from(err: RetryError<RemoteError>) -> Self {
        SyncError::Failed {
            context: err.context,
            attempts: err.attempts,
            source: err.source,
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        if err.is_capacity() {
            SyncError::Capacity(err)
        } else {
            SyncError::Storage(err)
        }
    }
}

impl SyncError {
    /// Returns the remote error behind this error, if any.
    pub fn remote_error(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(e) => Some(e),
            SyncError::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns the diagnostics attached by a retry wrapper, if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SyncError::Failed { context, .. } => Some(context),
            _ => None,
        }
    }
}
