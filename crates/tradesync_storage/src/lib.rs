//! # TradeSync Storage
//!
//! Persistent key-value stores for the TradeSync offline queue.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! sync engine. Stores are **opaque byte maps** - they do not interpret the
//! values they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple keyed blobs (get, set, delete)
//! - No knowledge of queue documents or the CBOR encoding
//! - Must be `Send + Sync` for concurrent access
//! - A write that cannot fit reports [`StorageError::QuotaExceeded`]
//!   instead of silently dropping data
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - Directory-backed store that survives restarts
//!
//! ## Example
//!
//! ```rust
//! use tradesync_storage::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.set("journal.queue", b"hello").unwrap();
//! assert_eq!(store.get("journal.queue").unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_key, KeyValueStore, MAX_KEY_LEN};
