//! Push-based save and sync status.

use crate::listeners::{ListenerSet, Subscription};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Outcome of the most recent local save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SaveStatus {
    /// Nothing saved yet this session.
    Idle,
    /// A save is in progress.
    Saving,
    /// The save reached the remote store.
    Saved,
    /// The save was queued for later delivery.
    SavedOffline,
    /// The save failed.
    Failed(String),
}

/// State of background synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    /// Nothing is pending.
    Synced,
    /// Operations are queued while online.
    Pending {
        /// Queue length.
        queued: usize,
    },
    /// Operations are queued while offline.
    Offline {
        /// Queue length.
        queued: usize,
    },
    /// A drain pass is running.
    Syncing {
        /// Operations of the pass not yet processed.
        remaining: usize,
    },
    /// An operation was given up.
    DeadLettered {
        /// Id of the operation.
        operation_id: String,
        /// Kind of entity.
        entity_type: String,
        /// Entity identifier.
        entity_id: String,
        /// Why it was given up.
        reason: String,
    },
}

/// Full state delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Save status.
    pub save: SaveStatus,
    /// Sync status.
    pub sync: SyncStatus,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            save: SaveStatus::Idle,
            sync: SyncStatus::Synced,
        }
    }
}

/// Callback receiving the full state after every change.
pub type StatusListener = dyn Fn(&SaveStatus, &SyncStatus) + Send + Sync;

/// Broadcasts save and sync status to UI subscribers.
///
/// New subscribers first receive the current state, then every change
/// ("replay-then-live"). The state is session-scoped and never persisted.
pub struct StatusPublisher {
    state: Mutex<StatusSnapshot>,
    listeners: ListenerSet<StatusListener>,
}

impl StatusPublisher {
    /// Creates a publisher in the `Idle`/`Synced` state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatusSnapshot::default()),
            listeners: ListenerSet::new(),
        }
    }

    /// Registers `listener` and synchronously replays the current state to
    /// it before returning.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SaveStatus, &SyncStatus) + Send + Sync + 'static,
    {
        let listener: Arc<StatusListener> = Arc::new(listener);
        self.listeners.deliver(|| {
            let current = self.snapshot();
            let subscription = self.listeners.add(Arc::clone(&listener));
            listener(&current.save, &current.sync);
            subscription
        })
    }

    /// Merges a partial update into the current state and broadcasts the
    /// result. Returns false if nothing changed.
    pub fn publish(&self, save: Option<SaveStatus>, sync: Option<SyncStatus>) -> bool {
        self.listeners.deliver(|| {
            let next = {
                let mut state = self.state.lock();
                let next = StatusSnapshot {
                    save: save.unwrap_or_else(|| state.save.clone()),
                    sync: sync.unwrap_or_else(|| state.sync.clone()),
                };
                if next == *state {
                    return false;
                }
                *state = next.clone();
                next
            };

            trace!(save = ?next.save, sync = ?next.sync, "status changed");
            for listener in self.listeners.snapshot() {
                listener(&next.save, &next.sync);
            }
            true
        })
    }

    /// Publishes a save status only.
    pub fn publish_save(&self, save: SaveStatus) -> bool {
        self.publish(Some(save), None)
    }

    /// Publishes a sync status only.
    pub fn publish_sync(&self, sync: SyncStatus) -> bool {
        self.publish(None, Some(sync))
    }

    /// The last known state.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().clone()
    }

    /// Returns to `Idle`/`Synced`, e.g. on logout.
    pub fn reset(&self) {
        let initial = StatusSnapshot::default();
        self.publish(Some(initial.save), Some(initial.sync));
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("state", &*self.state.lock())
            .field("subscribers", &self.listeners.len())
            .finish()
    }
}
