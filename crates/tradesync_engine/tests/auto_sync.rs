//! Connectivity-driven draining and status notifications.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tradesync_engine::{
    EngineConfig, MockRemoteStore, NetworkStatusMonitor, PendingOperationInput, RemoteError,
    RetryConfig, SaveStatus, SyncEngine, SyncStatus,
};
use tradesync_storage::InMemoryStore;

type MemEngine = SyncEngine<Arc<InMemoryStore>, Arc<MockRemoteStore>>;

struct Fixture {
    engine: Arc<MemEngine>,
    remote: Arc<MockRemoteStore>,
    monitor: Arc<NetworkStatusMonitor>,
}

fn fixture(online: bool) -> Fixture {
    let remote = Arc::new(MockRemoteStore::new());
    let monitor = Arc::new(NetworkStatusMonitor::new(online));
    let config = EngineConfig::new("journal").with_retry(
        RetryConfig::new(3)
            .with_base_delay(Duration::from_millis(20))
            .with_jitter(false),
    );
    let engine = SyncEngine::open(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::clone(&remote),
        Arc::clone(&monitor),
    )
    .unwrap();
    Fixture {
        engine: Arc::new(engine),
        remote,
        monitor,
    }
}

fn trade(entity_id: &str) -> PendingOperationInput {
    PendingOperationInput::create("trade", entity_id, b"{\"qty\":10}".to_vec())
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn reconnect_drains_without_force_sync() {
    let f = fixture(false);
    let _handle = f.engine.start();

    f.engine.queue_operation(trade("t-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(f.remote.call_count(), 0);
    assert_eq!(f.engine.queue_length(), 1);

    assert!(f.monitor.set_online(true));
    eventually("queue to drain", || f.engine.queue_length() == 0).await;
    assert_eq!(f.remote.call_count(), 1);
}

#[tokio::test]
async fn start_drains_existing_queue_when_online() {
    let f = fixture(true);
    f.engine.queue_operation(trade("t-1")).unwrap();
    f.engine.queue_operation(trade("t-2")).unwrap();

    let _handle = f.engine.start();
    eventually("queue to drain", || f.engine.queue_length() == 0).await;
    assert_eq!(f.remote.entity_ids(), vec!["t-1", "t-2"]);
}

#[tokio::test]
async fn backed_off_operation_is_retried_by_timer() {
    let f = fixture(false);
    let _handle = f.engine.start();
    f.remote.fail_entity("t-1", RemoteError::transient("503"), 2);
    f.engine.queue_operation(trade("t-1")).unwrap();

    f.monitor.set_online(true);
    eventually("queue to drain", || f.engine.queue_length() == 0).await;

    assert_eq!(f.remote.call_count(), 3);
    let stats = f.engine.stats();
    assert_eq!(stats.retries_scheduled, 2);
    assert_eq!(stats.operations_delivered, 1);
}

#[tokio::test]
async fn dropping_handle_stops_auto_drain() {
    let f = fixture(false);
    let handle = f.engine.start();
    handle.stop();

    f.engine.queue_operation(trade("t-1")).unwrap();
    f.monitor.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(f.remote.call_count(), 0);
    assert_eq!(f.engine.queue_length(), 1);
    assert_eq!(f.monitor.subscriber_count(), 0);
}

#[tokio::test]
async fn restart_survives_dropping_older_handle() {
    let f = fixture(false);
    let first = f.engine.start();
    let _second = f.engine.start();
    drop(first);

    f.engine.queue_operation(trade("t-1")).unwrap();
    assert!(f.monitor.set_online(true));
    eventually("queue to drain", || f.engine.queue_length() == 0).await;
    assert_eq!(f.remote.call_count(), 1);
    assert_eq!(f.monitor.subscriber_count(), 1);
}

#[tokio::test]
async fn online_to_online_does_not_trigger() {
    let f = fixture(true);
    let _handle = f.engine.start();
    f.remote.set_unreachable(true);
    f.engine.queue_operation(trade("t-1")).unwrap();

    f.monitor
        .handle_signal(tradesync_engine::ConnectivitySignal::online_via("wifi"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.remote.call_count(), 0);
}

#[tokio::test]
async fn status_stream_follows_save_and_sync() {
    let f = fixture(false);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    let _sub = f.engine.on_status_change(move |save, sync| {
        seen_in.lock().push((save.clone(), sync.clone()));
    });
    assert_eq!(
        seen.lock()[0],
        (SaveStatus::Idle, SyncStatus::Synced),
        "replayed on subscribe"
    );

    f.engine.submit(trade("t-1")).await.unwrap();
    assert_eq!(
        f.engine.publisher().snapshot().sync,
        SyncStatus::Offline { queued: 1 }
    );

    f.monitor.set_online(true);
    f.engine.force_sync().await.unwrap();

    let seen = seen.lock();
    let last = seen.last().unwrap();
    assert_eq!(last.0, SaveStatus::SavedOffline);
    assert_eq!(last.1, SyncStatus::Synced);
    assert!(seen
        .iter()
        .any(|(_, sync)| *sync == SyncStatus::Syncing { remaining: 1 }));
}

#[tokio::test]
async fn dead_letter_is_published() {
    let f = fixture(true);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    let _sub = f.engine.on_status_change(move |_, sync| {
        seen_in.lock().push(sync.clone());
    });

    f.remote.fail_next(RemoteError::permanent("symbol not found"));
    let op = f.engine.queue_operation(trade("t-1")).unwrap();
    f.engine.force_sync().await.unwrap();

    let seen = seen.lock();
    assert!(seen.iter().any(|sync| matches!(
        sync,
        SyncStatus::DeadLettered { operation_id, reason, .. }
            if *operation_id == op.id && reason.contains("symbol not found")
    )));
}

#[tokio::test]
async fn network_listeners_see_transitions() {
    let f = fixture(true);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    let sub = f
        .engine
        .on_network_status_change(move |status| seen_in.lock().push(status.is_online));

    f.monitor.set_online(false);
    f.monitor.set_online(true);
    sub.unsubscribe();
    f.monitor.set_online(false);

    assert_eq!(*seen.lock(), vec![false, true]);
    assert!(!f.engine.network_status().is_online);
}
