//! CLI command implementations.

pub mod clear;
pub mod dead_letters;
pub mod inspect;

use std::path::Path;
use tradesync_engine::OperationQueue;
use tradesync_storage::FileStore;

/// Opens the queue stored in an existing data directory.
///
/// Fails with `Locked` while a client holds the directory.
pub fn open_queue(
    path: &Path,
    namespace: &str,
) -> Result<OperationQueue<FileStore>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No TradeSync data found at {:?}", path).into());
    }
    let store = FileStore::open(path)?;
    Ok(OperationQueue::open(store, namespace)?)
}

/// Formats a millisecond timestamp relative to now.
pub fn age(timestamp_ms: u64) -> String {
    let now = tradesync_engine::now_millis();
    let secs = now.saturating_sub(timestamp_ms) / 1000;
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}
