//! Transient/permanent error classification.
//!
//! Tagged [`RemoteError`] variants are trusted as-is. Only untagged
//! third-party failures fall back to matching their message against a fixed
//! list of transient indicators, which is a heuristic: an unknown message is
//! treated as permanent so it is reported instead of retried forever.

use crate::error::{RemoteError, SyncError};
use serde::{Deserialize, Serialize};

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Expected to resolve on retry.
    Transient,
    /// Retrying will not fix it.
    Permanent,
}

impl ErrorClass {
    /// Returns true for [`ErrorClass::Transient`].
    pub fn is_transient(self) -> bool {
        self == ErrorClass::Transient
    }
}

/// Lower-case substrings that mark an untagged message as transient.
pub const TRANSIENT_INDICATORS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "temporary",
    "temporarily",
    "rate limit",
    "rate-limit",
    "too many requests",
];

/// Something that can be classified as transient or permanent.
pub trait Classify {
    /// Returns the class of this failure.
    fn class(&self) -> ErrorClass;
}

/// Classifies any classifiable failure.
pub fn classify<E: Classify + ?Sized>(error: &E) -> ErrorClass {
    error.class()
}

/// Classifies a free-form error message.
pub fn classify_message(message: &str) -> ErrorClass {
    let message = message.to_ascii_lowercase();
    if TRANSIENT_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

impl Classify for RemoteError {
    fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Unreachable(_) | RemoteError::Timeout | RemoteError::Transient(_) => {
                ErrorClass::Transient
            }
            RemoteError::Permanent(_) => ErrorClass::Permanent,
            RemoteError::Other(message) => classify_message(message),
        }
    }
}

impl Classify for SyncError {
    fn class(&self) -> ErrorClass {
        match self {
            SyncError::Remote(e) | SyncError::Failed { source: e, .. } => e.class(),
            // Local storage failures are reported to the caller, not retried.
            SyncError::Storage(_)
            | SyncError::Capacity(_)
            | SyncError::Codec(_)
            | SyncError::UnknownOperation(_)
            | SyncError::InvalidConfig(_) => ErrorClass::Permanent,
        }
    }
}

impl Classify for str {
    fn class(&self) -> ErrorClass {
        classify_message(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradesync_storage::StorageError;

    #[test]
    fn tagged_errors_are_trusted() {
        assert_eq!(classify(&RemoteError::Timeout), ErrorClass::Transient);
        assert_eq!(
            classify(&RemoteError::unreachable("offline")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&RemoteError::transient("503")),
            ErrorClass::Transient
        );
        // Tag wins over a misleading message.
        assert_eq!(
            classify(&RemoteError::permanent("network policy violation")),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn untagged_messages_fall_back_to_indicators() {
        for message in [
            "Network request failed",
            "request TIMEOUT",
            "operation timed out",
            "Connection reset by peer",
            "service temporarily unavailable",
            "Rate limit exceeded",
            "429 Too Many Requests",
        ] {
            assert_eq!(
                classify(&RemoteError::other(message)),
                ErrorClass::Transient,
                "{message}"
            );
        }
    }

    #[test]
    fn unknown_messages_are_permanent() {
        assert_eq!(
            classify(&RemoteError::other("price must be positive")),
            ErrorClass::Permanent
        );
        assert_eq!(classify("permission denied"), ErrorClass::Permanent);
        assert_eq!(classify(""), ErrorClass::Permanent);
    }

    #[test]
    fn sync_errors() {
        let err = SyncError::Remote(RemoteError::Timeout);
        assert!(classify(&err).is_transient());

        let err: SyncError = StorageError::QuotaExceeded {
            requested: 2,
            available: 1,
        }
        .into();
        assert_eq!(classify(&err), ErrorClass::Permanent);
    }
}
