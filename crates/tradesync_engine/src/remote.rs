//! Remote store abstraction.

use crate::error::RemoteError;
use crate::operation::{OperationType, PendingOperation};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Boxed future returned by [`RemoteStore`] calls.
pub type RemoteFuture<'a> = Pin<Box<dyn Future<Output = Result<(), RemoteError>> + Send + 'a>>;

/// Server-side persistence the engine delivers operations to.
///
/// Implementations should tag failures with the matching [`RemoteError`]
/// variant. [`RemoteError::Unreachable`] means the request never reached the
/// server.
pub trait RemoteStore: Send + Sync {
    /// Creates an entity.
    fn create<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a>;

    /// Updates an entity.
    fn update<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a>;

    /// Deletes an entity.
    fn delete<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a>;
}

impl<R: RemoteStore + ?Sized> RemoteStore for Arc<R> {
    fn create<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a> {
        (**self).create(entity_type, entity_id, payload)
    }

    fn update<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a> {
        (**self).update(entity_type, entity_id, payload)
    }

    fn delete<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a> {
        (**self).delete(entity_type, entity_id, payload)
    }
}

/// Calls the [`RemoteStore`] method matching `op_type`.
pub fn dispatch<'a, R: RemoteStore + ?Sized>(
    remote: &'a R,
    op_type: OperationType,
    entity_type: &'a str,
    entity_id: &'a str,
    payload: &'a [u8],
) -> RemoteFuture<'a> {
    match op_type {
        OperationType::Create => remote.create(entity_type, entity_id, payload),
        OperationType::Update => remote.update(entity_type, entity_id, payload),
        OperationType::Delete => remote.delete(entity_type, entity_id, payload),
    }
}

/// Sends a queued operation to the remote store.
pub fn deliver<'a, R: RemoteStore + ?Sized>(
    remote: &'a R,
    op: &'a PendingOperation,
) -> RemoteFuture<'a> {
    dispatch(remote, op.op_type, &op.entity_type, &op.entity_id, &op.payload)
}

/// A call received by [`MockRemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Method that was called.
    pub op_type: OperationType,
    /// Kind of entity.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Payload.
    pub payload: Vec<u8>,
}

/// In-memory remote store for testing.
///
/// Every call is recorded, then answered from (in order): the unreachable
/// switch, per-entity failures, the scripted result queue, and finally
/// success. Calls can be held back with [`MockRemoteStore::pause`].
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    calls: Mutex<Vec<RemoteCall>>,
    scripted: Mutex<VecDeque<Result<(), RemoteError>>>,
    entity_failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    always_failing: Mutex<HashMap<String, RemoteError>>,
    unreachable: AtomicBool,
    paused: AtomicBool,
    latency: Mutex<Option<Duration>>,
    resumed: Notify,
    call_made: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemoteStore {
    /// Creates a store that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of a future call.
    pub fn push_result(&self, result: Result<(), RemoteError>) {
        self.scripted.lock().push_back(result);
    }

    /// Fails the next call with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.push_result(Err(error));
    }

    /// Fails the next `times` calls for `entity_id` with `error`.
    pub fn fail_entity(&self, entity_id: &str, error: RemoteError, times: usize) {
        let mut failures = self.entity_failures.lock();
        let queue = failures.entry(entity_id.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Fails every call for `entity_id` with `error`.
    pub fn fail_entity_always(&self, entity_id: &str, error: RemoteError) {
        self.always_failing
            .lock()
            .insert(entity_id.to_string(), error);
    }

    /// Answers every call with [`RemoteError::Unreachable`] while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delays every answer by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Holds back answers until [`MockRemoteStore::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Releases held-back calls.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Entity ids of the calls received so far, in order.
    pub fn entity_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.entity_id.clone())
            .collect()
    }

    /// Waits until at least `n` calls were received.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.call_made.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Calls currently being answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer<'a>(
        &'a self,
        op_type: OperationType,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a> {
        Box::pin(async move {
            self.calls.lock().push(RemoteCall {
                op_type,
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                payload: payload.to_vec(),
            });
            let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
            self.call_made.notify_waiters();

            self.wait_resumed().await;
            let latency = *self.latency.lock();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if self.unreachable.load(Ordering::SeqCst) {
                return Err(RemoteError::unreachable("mock remote unreachable"));
            }
            if let Some(error) = self.always_failing.lock().get(entity_id) {
                return Err(error.clone());
            }
            let entity_failure = self
                .entity_failures
                .lock()
                .get_mut(entity_id)
                .and_then(VecDeque::pop_front);
            if let Some(error) = entity_failure {
                return Err(error);
            }
            let scripted = self.scripted.lock().pop_front();
            scripted.unwrap_or(Ok(()))
        })
    }

    async fn wait_resumed(&self) {
        loop {
            let notified = self.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.paused.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

impl RemoteStore for MockRemoteStore {
    fn create<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a> {
        self.answer(OperationType::Create, entity_type, entity_id, payload)
    }

    fn update<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a> {
        self.answer(OperationType::Update, entity_type, entity_id, payload)
    }

    fn delete<'a>(
        &'a self,
        entity_type: &'a str,
        entity_id: &'a str,
        payload: &'a [u8],
    ) -> RemoteFuture<'a> {
        self.answer(OperationType::Delete, entity_type, entity_id, payload)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
