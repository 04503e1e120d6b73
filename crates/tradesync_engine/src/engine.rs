//! The sync engine: drains the operation queue into the remote store.
//!
//! # Drain passes
//!
//! A pass snapshots the queue and walks it head to tail, one remote call at
//! a time:
//!
//! ```text
//! Idle ──(online transition | force_sync)──▶ Draining ──(batch done)──▶ Idle
//! ```
//!
//! - Success removes the operation.
//! - A permanent failure, or a transient one with no retries left, moves the
//!   operation to the dead-letter ledger.
//! - A transient failure with retries left backs the operation off and
//!   blocks the rest of that entity for the pass.
//! - An unreachable remote, or the monitor going offline, ends the pass
//!   without touching attempt counts.
//!
//! Only one pass runs at a time. [`SyncEngine::clear_offline_data`] cancels a
//! running pass between operations or while it awaits the remote store.

use crate::classifier::classify;
use crate::config::EngineConfig;
use crate::context::ErrorContext;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::listeners::Subscription;
use crate::network::{NetworkStatus, NetworkStatusMonitor};
use crate::operation::{now_millis, DeadLetter, PendingOperation, PendingOperationInput};
use crate::publisher::{SaveStatus, StatusPublisher, SyncStatus};
use crate::queue::OperationQueue;
use crate::remote::{deliver, dispatch, RemoteStore};
use crate::retry::{next_delay, retry_operation, should_retry};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tradesync_storage::KeyValueStore;

/// Derived engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncState {
    /// Whether a drain pass is running.
    pub is_sync_in_progress: bool,
    /// Number of pending operations.
    pub queue_length: usize,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Operations acknowledged by the remote store.
    pub delivered: usize,
    /// Operations moved to the dead-letter ledger.
    pub dead_lettered: usize,
    /// Operations that failed transiently and stay queued.
    pub deferred: usize,
    /// Operations not attempted because of backoff or an earlier operation
    /// on the same entity.
    pub skipped: usize,
    /// The pass ended early because connectivity was lost.
    pub interrupted: bool,
    /// The pass was cancelled by a clear.
    pub cancelled: bool,
    /// This call waited for a pass started elsewhere instead of running one.
    pub joined: bool,
}

impl DrainReport {
    fn joined() -> Self {
        Self {
            joined: true,
            ..Self::default()
        }
    }
}

/// Counters over the engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Passes that ran to the end of their batch.
    pub passes_completed: u64,
    /// Passes ended by lost connectivity.
    pub passes_interrupted: u64,
    /// Operations delivered by passes.
    pub operations_delivered: u64,
    /// Operations dead-lettered by passes.
    pub operations_dead_lettered: u64,
    /// Transient failures that scheduled a retry.
    pub retries_scheduled: u64,
    /// Saves delivered directly by [`SyncEngine::submit`].
    pub direct_deliveries: u64,
    /// End of the last pass, milliseconds since the Unix epoch.
    pub last_pass_at: Option<u64>,
    /// Message of the most recent delivery failure.
    pub last_error: Option<String>,
}

/// How [`SyncEngine::submit`] disposed of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The remote store acknowledged the save.
    Delivered,
    /// The save was queued for later delivery.
    Queued(PendingOperation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassMode {
    /// Requested by the caller; ignores backoff windows.
    Manual,
    /// Triggered by connectivity or a retry timer; respects backoff.
    Automatic,
}

struct AutoDrain<S: KeyValueStore, R: RemoteStore> {
    generation: u64,
    runtime: Handle,
    engine: Weak<SyncEngine<S, R>>,
    retry_timer: Option<JoinHandle<()>>,
}

/// Offline-first synchronization engine.
///
/// Owns the operation queue and is meant to be shared as
/// `Arc<SyncEngine<_, _>>` by the composition root.
pub struct SyncEngine<S: KeyValueStore, R: RemoteStore> {
    config: EngineConfig,
    queue: Mutex<OperationQueue<S>>,
    remote: R,
    monitor: Arc<NetworkStatusMonitor>,
    publisher: StatusPublisher,
    in_progress: AtomicBool,
    pass_done: Notify,
    epoch: watch::Sender<u64>,
    stats: Mutex<SyncStats>,
    auto: Mutex<Option<AutoDrain<S, R>>>,
    auto_generation: AtomicU64,
}

impl<S, R> SyncEngine<S, R>
where
    S: KeyValueStore + 'static,
    R: RemoteStore + 'static,
{
    /// Opens the engine, loading any operations persisted in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the persisted queue cannot
    /// be loaded.
    pub fn open(
        config: EngineConfig,
        store: S,
        remote: R,
        monitor: Arc<NetworkStatusMonitor>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let queue = OperationQueue::open(store, &config.namespace)?;
        let (epoch, _) = watch::channel(0u64);

        info!(
            namespace = %config.namespace,
            queued = queue.len(),
            dead_letters = queue.dead_letters().len(),
            "sync engine opened"
        );

        let engine = Self {
            config,
            queue: Mutex::new(queue),
            remote,
            monitor,
            publisher: StatusPublisher::new(),
            in_progress: AtomicBool::new(false),
            pass_done: Notify::new(),
            epoch,
            stats: Mutex::new(SyncStats::default()),
            auto: Mutex::new(None),
            auto_generation: AtomicU64::new(0),
        };
        engine.publish_queue_status();
        Ok(engine)
    }

    /// Starts automatic draining on the current tokio runtime.
    ///
    /// Every offline→online transition of the monitor triggers a pass, and
    /// an initial pass runs if the device is online with queued work. Passes
    /// that leave operations backing off schedule a follow-up pass. Dropping
    /// the returned handle stops all of this.
    ///
    /// Calling `start` again replaces the previous handle's automatic
    /// draining; dropping the older handle afterwards leaves the newer one
    /// running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> EngineHandle {
        let runtime = Handle::current();
        let generation = self.auto_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.auto.lock().replace(AutoDrain {
            generation,
            runtime,
            engine: Arc::downgrade(self),
            retry_timer: None,
        }) {
            if let Some(timer) = previous.retry_timer {
                timer.abort();
            }
        }

        let was_online = AtomicBool::new(self.monitor.is_online());
        let engine = Arc::downgrade(self);
        let network = self.monitor.subscribe(move |status: &NetworkStatus| {
            let previously = was_online.swap(status.is_online, Ordering::SeqCst);
            if status.is_online && !previously {
                match engine.upgrade() {
                    Some(engine)
                        if engine.auto_generation.load(Ordering::SeqCst) == generation =>
                    {
                        debug!("connectivity restored, scheduling drain");
                        engine.spawn_pass(PassMode::Automatic);
                    }
                    _ => {}
                }
            }
        });

        let engine = Arc::downgrade(self);
        let auto = Subscription::new(move || {
            if let Some(engine) = engine.upgrade() {
                engine.stop_auto_drain(generation);
            }
        });

        if self.monitor.is_online() && !self.queue.lock().is_empty() {
            self.spawn_pass(PassMode::Automatic);
        }

        info!(namespace = %self.config.namespace, "automatic sync started");
        EngineHandle {
            _network: network,
            _auto: auto,
        }
    }

    /// Queues a mutation for delivery. Does not start a pass.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Capacity`] if local storage is full, or another
    /// error if the operation could not be persisted.
    pub fn queue_operation(&self, input: PendingOperationInput) -> SyncResult<PendingOperation> {
        let input = self.with_default_owner(input);
        let op = self.queue.lock().enqueue(input)?;
        debug!(
            id = %op.id,
            op_type = %op.op_type,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            "operation queued"
        );
        if !self.is_sync_in_progress() {
            self.publish_queue_status();
        }
        Ok(op)
    }

    /// Saves through the remote store, falling back to the queue.
    ///
    /// Offline, or with earlier operations on the same entity still queued,
    /// the save is queued. Otherwise it is delivered directly with the
    /// `submit_retry` policy; a transient failure queues it, a permanent one
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns the permanent delivery failure, or a storage error if the
    /// fallback enqueue failed.
    pub async fn submit(&self, input: PendingOperationInput) -> SyncResult<SubmitOutcome> {
        let input = self.with_default_owner(input);
        self.publisher.publish_save(SaveStatus::Saving);

        if !self.monitor.is_online() || self.has_queued_entity(&input.entity_id) {
            return self.submit_queued(input);
        }

        let context = ErrorContext::new(format!("{} {}", input.op_type, input.entity_type))
            .with_component("sync_engine")
            .with_user_id(input.owner_id.clone())
            .with_client_info(self.config.client_info.clone());
        let timeout = self.config.request_timeout;
        let remote = &self.remote;
        let call = &input;

        let result = retry_operation(
            move || async move {
                let request = dispatch(
                    remote,
                    call.op_type,
                    &call.entity_type,
                    &call.entity_id,
                    &call.payload,
                );
                tokio::time::timeout(timeout, request)
                    .await
                    .unwrap_or_else(|_| Err(RemoteError::Timeout))
            },
            &self.config.submit_retry,
            context,
        )
        .await
        .map_err(SyncError::from);

        match result {
            Ok(()) => {
                self.stats.lock().direct_deliveries += 1;
                self.publisher.publish_save(SaveStatus::Saved);
                Ok(SubmitOutcome::Delivered)
            }
            Err(SyncError::Failed { source, .. }) if classify(&source).is_transient() => {
                debug!(
                    entity_id = %input.entity_id,
                    error = %source,
                    "direct save failed transiently, queueing"
                );
                self.stats.lock().last_error = Some(source.to_string());
                self.submit_queued(input)
            }
            Err(e) => {
                warn!(entity_id = %input.entity_id, error = %e, "save rejected");
                self.stats.lock().last_error = Some(e.to_string());
                self.publisher.publish_save(SaveStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Runs a pass now, ignoring backoff windows.
    ///
    /// If a pass is already running, waits for it to finish and returns a
    /// report with `joined` set instead of starting a second one.
    ///
    /// # Errors
    ///
    /// Returns an error only if local storage failed mid-pass.
    pub async fn force_sync(&self) -> SyncResult<DrainReport> {
        self.run_pass(PassMode::Manual).await
    }

    /// Number of pending operations.
    pub fn queue_length(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether a pass is running.
    pub fn is_sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Progress flag and queue length.
    pub fn sync_state(&self) -> SyncState {
        SyncState {
            is_sync_in_progress: self.is_sync_in_progress(),
            queue_length: self.queue_length(),
        }
    }

    /// Pending operations in queue order.
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.lock().peek_batch()
    }

    /// Last known connectivity.
    pub fn network_status(&self) -> NetworkStatus {
        self.monitor.status()
    }

    /// Registers a connectivity listener.
    pub fn on_network_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        self.monitor.subscribe(listener)
    }

    /// Registers a status listener; it immediately receives the current
    /// state.
    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SaveStatus, &SyncStatus) + Send + Sync + 'static,
    {
        self.publisher.subscribe(listener)
    }

    /// Discards every pending operation, e.g. on logout.
    ///
    /// A running pass is cancelled and has finished when this returns; no
    /// further remote calls are made for the discarded operations. Pending
    /// retry timers are dropped and the status is reset. Dead letters are
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the queue could not be deleted.
    pub async fn clear_offline_data(&self) -> SyncResult<()> {
        if let Some(auto) = self.auto.lock().as_mut() {
            if let Some(timer) = auto.retry_timer.take() {
                timer.abort();
            }
        }

        // Passes snapshot the queue and the epoch under the same lock.
        let discarded = {
            let mut queue = self.queue.lock();
            self.epoch.send_modify(|epoch| *epoch += 1);
            let discarded = queue.len();
            queue.clear()?;
            discarded
        };

        self.wait_until_idle().await;
        self.publisher.reset();
        info!(discarded, "offline data cleared");
        Ok(())
    }

    /// Operations given up so far.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.lock().dead_letters().to_vec()
    }

    /// Forgets all dead letters.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the ledger could not be deleted.
    pub fn clear_dead_letters(&self) -> SyncResult<()> {
        self.queue.lock().clear_dead_letters()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.lock().clone()
    }

    /// The engine's status publisher.
    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    /// The engine's network monitor.
    pub fn monitor(&self) -> &Arc<NetworkStatusMonitor> {
        &self.monitor
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn with_default_owner(&self, input: PendingOperationInput) -> PendingOperationInput {
        if input.owner_id.is_empty() && !self.config.default_owner_id.is_empty() {
            input.with_owner(self.config.default_owner_id.clone())
        } else {
            input
        }
    }

    fn has_queued_entity(&self, entity_id: &str) -> bool {
        self.queue
            .lock()
            .peek_batch()
            .iter()
            .any(|op| op.entity_id == entity_id)
    }

    fn submit_queued(&self, input: PendingOperationInput) -> SyncResult<SubmitOutcome> {
        match self.queue_operation(input) {
            Ok(op) => {
                self.publisher.publish_save(SaveStatus::SavedOffline);
                Ok(SubmitOutcome::Queued(op))
            }
            Err(e) => {
                warn!(error = %e, "could not queue save");
                self.publisher.publish_save(SaveStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn spawn_pass(self: &Arc<Self>, mode: PassMode) {
        let runtime = match self.auto.lock().as_ref() {
            Some(auto) => auto.runtime.clone(),
            None => return,
        };
        let engine = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = engine.run_pass(mode).await {
                warn!(error = %e, "automatic sync pass failed");
            }
        });
    }

    /// Stops automatic draining if `generation` is still the installed one.
    fn stop_auto_drain(&self, generation: u64) {
        let mut auto = self.auto.lock();
        if auto.as_ref().map(|auto| auto.generation) != Some(generation) {
            return;
        }
        if let Some(auto) = auto.take() {
            if let Some(timer) = auto.retry_timer {
                timer.abort();
            }
            debug!(generation = auto.generation, "automatic sync stopped");
        }
    }

    async fn wait_until_idle(&self) {
        loop {
            let done = self.pass_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();
            if !self.in_progress.load(Ordering::SeqCst) {
                return;
            }
            done.await;
        }
    }

    async fn run_pass(&self, mode: PassMode) -> SyncResult<DrainReport> {
        let done = self.pass_done.notified();
        tokio::pin!(done);
        done.as_mut().enable();

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if mode == PassMode::Manual {
                debug!("sync pass in progress, waiting for it");
                done.await;
            }
            return Ok(DrainReport::joined());
        }

        let guard = PassGuard { engine: self };
        let result = self.drain(mode).await;
        drop(guard);

        if let Ok(report) = &result {
            if !report.cancelled && !report.interrupted {
                self.schedule_follow_up();
            }
        }
        result
    }

    async fn drain(&self, mode: PassMode) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();

        if !self.monitor.is_online() {
            debug!("offline, skipping sync pass");
            report.interrupted = true;
            self.finish_pass(&report);
            return Ok(report);
        }

        let (mut epoch, start_epoch, batch) = {
            let queue = self.queue.lock();
            let mut epoch = self.epoch.subscribe();
            let start_epoch = *epoch.borrow_and_update();
            (epoch, start_epoch, queue.peek_batch())
        };
        if batch.is_empty() {
            self.publish_queue_status();
            return Ok(report);
        }

        debug!(operations = batch.len(), ?mode, "sync pass started");
        let now = now_millis();
        let mut blocked: HashSet<&str> = HashSet::new();

        for (index, op) in batch.iter().enumerate() {
            if *epoch.borrow() != start_epoch {
                report.cancelled = true;
                break;
            }
            if blocked.contains(op.entity_id.as_str()) {
                report.skipped += 1;
                continue;
            }
            if mode == PassMode::Automatic && op.is_backing_off(now) {
                blocked.insert(&op.entity_id);
                report.skipped += 1;
                continue;
            }
            if !self.monitor.is_online() {
                info!("connectivity lost, ending sync pass");
                report.interrupted = true;
                break;
            }

            self.publisher.publish_sync(SyncStatus::Syncing {
                remaining: batch.len() - index,
            });
            debug!(
                id = %op.id,
                op_type = %op.op_type,
                entity_id = %op.entity_id,
                attempt = op.attempt_count + 1,
                "delivering operation"
            );

            let request = tokio::time::timeout(self.config.request_timeout, deliver(&self.remote, op));
            let outcome = tokio::select! {
                biased;
                _ = epoch.changed() => None,
                result = request => Some(result.unwrap_or_else(|_| Err(RemoteError::Timeout))),
            };
            let Some(result) = outcome else {
                report.cancelled = true;
                break;
            };

            match result {
                Ok(()) => {
                    let removed = self.queue.lock().remove(&op.id);
                    if self.tolerate_vanished(removed)?.is_some() {
                        report.delivered += 1;
                    }
                }
                Err(error) if error.is_unreachable() => {
                    info!(error = %error, "remote unreachable, ending sync pass");
                    report.interrupted = true;
                    break;
                }
                Err(error) => {
                    let class = classify(&error);
                    let reason = error.to_string();
                    self.stats.lock().last_error = Some(reason.clone());

                    if should_retry(op.attempt_count, &self.config.retry, class) {
                        let delay = next_delay(op.attempt_count, &self.config.retry);
                        let marked = self
                            .queue
                            .lock()
                            .mark_attempt_failed(&op.id, &reason, delay);
                        if self.tolerate_vanished(marked)?.is_some() {
                            debug!(
                                id = %op.id,
                                entity_id = %op.entity_id,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "delivery failed, will retry"
                            );
                            report.deferred += 1;
                        }
                        blocked.insert(&op.entity_id);
                    } else {
                        let letter = self.queue.lock().dead_letter(&op.id, &reason, class);
                        if let Some(letter) = self.tolerate_vanished(letter)? {
                            warn!(
                                id = %op.id,
                                op_type = %op.op_type,
                                entity_type = %op.entity_type,
                                entity_id = %op.entity_id,
                                attempts = op.attempt_count + 1,
                                ?class,
                                reason = %letter.reason,
                                "operation dead-lettered"
                            );
                            self.publisher.publish_sync(SyncStatus::DeadLettered {
                                operation_id: op.id.clone(),
                                entity_type: op.entity_type.clone(),
                                entity_id: op.entity_id.clone(),
                                reason,
                            });
                            report.dead_lettered += 1;
                        }
                    }
                }
            }
        }

        if report.cancelled {
            debug!("sync pass cancelled");
            return Ok(report);
        }
        self.finish_pass(&report);
        Ok(report)
    }

    /// Maps an unknown id to `None`: the queue was cleared while the remote
    /// call was in flight.
    fn tolerate_vanished<T>(&self, result: SyncResult<T>) -> SyncResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(SyncError::UnknownOperation(id)) => {
                debug!(%id, "operation vanished during sync pass");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "local storage failed during sync pass");
                Err(e)
            }
        }
    }

    fn finish_pass(&self, report: &DrainReport) {
        {
            let mut stats = self.stats.lock();
            if report.interrupted {
                stats.passes_interrupted += 1;
            } else {
                stats.passes_completed += 1;
            }
            stats.operations_delivered += report.delivered as u64;
            stats.operations_dead_lettered += report.dead_lettered as u64;
            stats.retries_scheduled += report.deferred as u64;
            stats.last_pass_at = Some(now_millis());
        }

        info!(
            delivered = report.delivered,
            dead_lettered = report.dead_lettered,
            deferred = report.deferred,
            skipped = report.skipped,
            interrupted = report.interrupted,
            remaining = self.queue_length(),
            "sync pass finished"
        );
        self.publish_queue_status();
    }

    fn schedule_follow_up(&self) {
        let earliest = self
            .queue
            .lock()
            .peek_batch()
            .iter()
            .filter_map(|op| op.next_attempt_at)
            .min();

        let mut auto = self.auto.lock();
        let Some(auto) = auto.as_mut() else {
            return;
        };
        if let Some(timer) = auto.retry_timer.take() {
            timer.abort();
        }
        let Some(at) = earliest else {
            return;
        };

        let delay = Duration::from_millis(at.saturating_sub(now_millis()));
        let engine = auto.engine.clone();
        debug!(delay_ms = delay.as_millis() as u64, "scheduling retry pass");
        auto.retry_timer = Some(auto.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                engine.spawn_pass(PassMode::Automatic);
            }
        }));
    }

    fn publish_queue_status(&self) {
        let queued = self.queue_length();
        let status = if queued == 0 {
            SyncStatus::Synced
        } else if self.monitor.is_online() {
            SyncStatus::Pending { queued }
        } else {
            SyncStatus::Offline { queued }
        };
        self.publisher.publish_sync(status);
    }
}

/// Clears the in-progress flag and wakes waiters, even if the pass future
/// is dropped.
struct PassGuard<'a, S: KeyValueStore, R: RemoteStore> {
    engine: &'a SyncEngine<S, R>,
}

impl<S: KeyValueStore, R: RemoteStore> Drop for PassGuard<'_, S, R> {
    fn drop(&mut self) {
        self.engine.in_progress.store(false, Ordering::SeqCst);
        self.engine.pass_done.notify_waiters();
    }
}

/// Keeps automatic draining alive; dropping it stops auto-drain and any
/// pending retry timer.
#[must_use = "dropping the handle stops automatic sync"]
#[derive(Debug)]
pub struct EngineHandle {
    _network: Subscription,
    _auto: Subscription,
}

impl EngineHandle {
    /// Stops automatic draining.
    pub fn stop(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::remote::MockRemoteStore;
    use tradesync_storage::InMemoryStore;

    type TestEngine = SyncEngine<Arc<InMemoryStore>, Arc<MockRemoteStore>>;

    fn engine(online: bool) -> (TestEngine, Arc<MockRemoteStore>) {
        let remote = Arc::new(MockRemoteStore::new());
        let config = EngineConfig::new("test").with_retry(
            RetryConfig::new(3)
                .with_base_delay(Duration::from_millis(100))
                .with_jitter(false),
        );
        let engine = SyncEngine::open(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::clone(&remote),
            Arc::new(NetworkStatusMonitor::new(online)),
        )
        .unwrap();
        (engine, remote)
    }

    fn trade(id: &str) -> PendingOperationInput {
        PendingOperationInput::update("trade", id, b"{}".to_vec())
    }

    #[test]
    fn open_rejects_unusable_namespace() {
        let result = SyncEngine::open(
            EngineConfig::new("my journal"),
            Arc::new(InMemoryStore::new()),
            Arc::new(MockRemoteStore::new()),
            Arc::new(NetworkStatusMonitor::new(true)),
        );
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn drains_in_order() {
        let (engine, remote) = engine(true);
        engine.queue_operation(trade("a")).unwrap();
        engine.queue_operation(trade("b")).unwrap();

        let report = engine.force_sync().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(engine.queue_length(), 0);
        assert_eq!(remote.entity_ids(), vec!["a", "b"]);
        assert_eq!(engine.publisher().snapshot().sync, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn offline_pass_does_nothing() {
        let (engine, remote) = engine(false);
        engine.queue_operation(trade("a")).unwrap();

        let report = engine.force_sync().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(remote.call_count(), 0);
        assert_eq!(
            engine.publisher().snapshot().sync,
            SyncStatus::Offline { queued: 1 }
        );
    }

    #[tokio::test]
    async fn transient_failure_blocks_entity_only() {
        let (engine, remote) = engine(true);
        remote.fail_entity("a", RemoteError::transient("503"), 1);
        engine.queue_operation(trade("a")).unwrap();
        engine.queue_operation(trade("b")).unwrap();
        engine.queue_operation(trade("a")).unwrap();

        let report = engine.force_sync().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(remote.entity_ids(), vec!["a", "b"]);

        let pending = engine.pending_operations();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].attempt_count, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("transient remote failure: 503"));
        assert_eq!(
            engine.publisher().snapshot().sync,
            SyncStatus::Pending { queued: 2 }
        );
    }

    #[tokio::test]
    async fn unreachable_keeps_attempt_count() {
        let (engine, remote) = engine(true);
        remote.set_unreachable(true);
        engine.queue_operation(trade("a")).unwrap();

        let report = engine.force_sync().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(engine.pending_operations()[0].attempt_count, 0);
        assert_eq!(engine.stats().passes_interrupted, 1);
    }

    #[tokio::test]
    async fn default_owner_applied() {
        let (engine, _remote) = engine(true);
        let engine = SyncEngine::open(
            engine.config().clone().with_default_owner_id("u9"),
            Arc::new(InMemoryStore::new()),
            Arc::new(MockRemoteStore::new()),
            Arc::new(NetworkStatusMonitor::new(true)),
        )
        .unwrap();

        let op = engine.queue_operation(trade("a")).unwrap();
        assert_eq!(op.owner_id, "u9");
        let op = engine.queue_operation(trade("b").with_owner("u1")).unwrap();
        assert_eq!(op.owner_id, "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_is_transient() {
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_latency(Some(Duration::from_secs(60)));
        let engine = SyncEngine::open(
            EngineConfig::new("test").with_request_timeout(Duration::from_secs(1)),
            Arc::new(InMemoryStore::new()),
            Arc::clone(&remote),
            Arc::new(NetworkStatusMonitor::new(true)),
        )
        .unwrap();
        engine.queue_operation(trade("a")).unwrap();

        let report = engine.force_sync().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(
            engine.pending_operations()[0].last_error.as_deref(),
            Some("remote call timed out")
        );
    }

    #[tokio::test]
    async fn submit_online_delivers() {
        let (engine, remote) = engine(true);
        let outcome = engine.submit(trade("a")).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Delivered);
        assert_eq!(remote.call_count(), 1);
        assert_eq!(engine.publisher().snapshot().save, SaveStatus::Saved);
        assert_eq!(engine.stats().direct_deliveries, 1);
    }

    #[tokio::test]
    async fn submit_offline_queues() {
        let (engine, remote) = engine(false);
        let outcome = engine.submit(trade("a")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        assert_eq!(remote.call_count(), 0);
        assert_eq!(engine.queue_length(), 1);
        assert_eq!(engine.publisher().snapshot().save, SaveStatus::SavedOffline);
    }

    #[tokio::test]
    async fn submit_behind_queued_entity_queues() {
        let (engine, remote) = engine(true);
        engine.queue_operation(trade("a")).unwrap();

        let outcome = engine.submit(trade("a")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        assert_eq!(remote.call_count(), 0);
        assert_eq!(engine.queue_length(), 2);
    }

    #[tokio::test]
    async fn submit_permanent_failure_is_returned() {
        let (engine, remote) = engine(true);
        remote.fail_next(RemoteError::permanent("quantity must be positive"));

        let err = engine.submit(trade("a")).await.unwrap_err();
        assert!(matches!(err, SyncError::Failed { attempts: 1, .. }));
        assert_eq!(engine.queue_length(), 0);
        assert!(matches!(
            engine.publisher().snapshot().save,
            SaveStatus::Failed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_transient_failure_falls_back_to_queue() {
        let (engine, remote) = engine(true);
        remote.fail_entity_always("a", RemoteError::transient("429 too many requests"));

        let outcome = engine.submit(trade("a")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        // One try plus one retry under the default submit policy.
        assert_eq!(remote.call_count(), 2);
        assert_eq!(engine.queue_length(), 1);
    }

    #[tokio::test]
    async fn dead_letters_can_be_cleared() {
        let (engine, remote) = engine(true);
        remote.fail_next(RemoteError::permanent("invalid"));
        engine.queue_operation(trade("a")).unwrap();

        engine.force_sync().await.unwrap();
        assert_eq!(engine.dead_letters().len(), 1);
        assert_eq!(engine.stats().operations_dead_lettered, 1);

        engine.clear_dead_letters().unwrap();
        assert!(engine.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn sync_state_reports_length() {
        let (engine, _remote) = engine(true);
        engine.queue_operation(trade("a")).unwrap();
        assert_eq!(
            engine.sync_state(),
            SyncState {
                is_sync_in_progress: false,
                queue_length: 1,
            }
        );
    }
}
