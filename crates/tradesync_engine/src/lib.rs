//! # TradeSync Engine
//!
//! Offline-first synchronization for the TradeSync journal.
//!
//! This crate provides:
//! - A durable FIFO queue of pending mutations
//! - Connectivity tracking with push notifications
//! - Transient/permanent error classification
//! - Retry with exponential backoff and jitter
//! - A drain engine that replays the queue into a remote store
//! - A status publisher for save and sync indicators
//!
//! ## Architecture
//!
//! Local writes become [`PendingOperation`]s in an [`OperationQueue`] backed
//! by a [`tradesync_storage::KeyValueStore`]. The [`SyncEngine`] drains the
//! queue into a [`RemoteStore`] whenever the [`NetworkStatusMonitor`] reports
//! an offline→online transition or the caller forces a pass.
//!
//! ## Key Invariants
//!
//! - An operation leaves the queue only after the remote store acknowledged
//!   it, or after it was dead-lettered
//! - Operations on the same entity reach the remote store in enqueue order
//! - At most one drain pass runs at a time
//! - Conflicts resolve as last-write-wins; nothing is merged
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tradesync_engine::{
//!     EngineConfig, MockRemoteStore, NetworkStatusMonitor, PendingOperationInput, SyncEngine,
//! };
//! use tradesync_storage::InMemoryStore;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let engine = SyncEngine::open(
//!     EngineConfig::new("journal"),
//!     InMemoryStore::new(),
//!     MockRemoteStore::new(),
//!     Arc::new(NetworkStatusMonitor::new(true)),
//! )
//! .unwrap();
//!
//! engine
//!     .queue_operation(PendingOperationInput::create("trade", "t-1", b"{}".to_vec()))
//!     .unwrap();
//! assert_eq!(engine.queue_length(), 1);
//!
//! let report = engine.force_sync().await.unwrap();
//! assert_eq!(report.delivered, 1);
//! assert_eq!(engine.queue_length(), 0);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classifier;
mod config;
mod context;
mod engine;
mod error;
mod listeners;
mod network;
mod operation;
mod publisher;
mod queue;
mod remote;
mod retry;

pub use classifier::{classify, classify_message, Classify, ErrorClass, TRANSIENT_INDICATORS};
pub use config::{EngineConfig, RetryConfig};
pub use context::{default_client_info, ErrorContext};
pub use engine::{DrainReport, EngineHandle, SubmitOutcome, SyncEngine, SyncState, SyncStats};
pub use error::{RemoteError, RetryError, SyncError, SyncResult};
pub use listeners::Subscription;
pub use network::{
    spawn_probe_loop, ConnectivityProbe, ConnectivitySignal, NetworkListener, NetworkStatus,
    NetworkStatusMonitor, ProbeFuture, TcpProbe,
};
pub use operation::{now_millis, DeadLetter, OperationType, PendingOperation, PendingOperationInput};
pub use publisher::{SaveStatus, StatusListener, StatusPublisher, StatusSnapshot, SyncStatus};
pub use queue::{OperationQueue, FORMAT_VERSION};
pub use remote::{deliver, dispatch, MockRemoteStore, RemoteCall, RemoteFuture, RemoteStore};
pub use retry::{next_delay, retry_operation, should_retry};
