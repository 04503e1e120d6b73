//! Connectivity tracking.
//!
//! [`NetworkStatusMonitor`] caches the last known connectivity and tells
//! subscribers about every transition. Raw signals come from the host
//! application ([`NetworkStatusMonitor::handle_signal`]) or from a
//! [`ConnectivityProbe`] polled on an interval.

use crate::listeners::{ListenerSet, Subscription};
use crate::operation::now_millis;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Last known connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Whether the device is believed to be online.
    pub is_online: bool,
    /// When the device last became online, milliseconds since the Unix
    /// epoch.
    pub last_online_time: Option<u64>,
    /// Kind of connection, if the platform reports one (e.g. `"wifi"`).
    pub connection_type: Option<String>,
}

/// A raw connectivity event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivitySignal {
    /// The platform reports a connection.
    ///
    /// `None` keeps the previously known connection type.
    Online {
        /// Kind of connection.
        connection_type: Option<String>,
    },
    /// The platform reports no connection.
    Offline,
}

impl ConnectivitySignal {
    /// Online, connection type unknown.
    pub fn online() -> Self {
        ConnectivitySignal::Online {
            connection_type: None,
        }
    }

    /// Online over the named connection type.
    pub fn online_via(connection_type: impl Into<String>) -> Self {
        ConnectivitySignal::Online {
            connection_type: Some(connection_type.into()),
        }
    }

    /// Returns true for [`ConnectivitySignal::Online`].
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivitySignal::Online { .. })
    }
}

/// Callback invoked on every connectivity transition.
pub type NetworkListener = dyn Fn(&NetworkStatus) + Send + Sync;

/// Tracks connectivity and notifies subscribers on transitions.
pub struct NetworkStatusMonitor {
    status: Mutex<NetworkStatus>,
    listeners: ListenerSet<NetworkListener>,
}

impl NetworkStatusMonitor {
    /// Creates a monitor with a best-effort initial state.
    pub fn new(initially_online: bool) -> Self {
        Self {
            status: Mutex::new(NetworkStatus {
                is_online: initially_online,
                last_online_time: initially_online.then(now_millis),
                connection_type: None,
            }),
            listeners: ListenerSet::new(),
        }
    }

    /// Current cached status. Never blocks on I/O.
    pub fn status(&self) -> NetworkStatus {
        self.status.lock().clone()
    }

    /// Returns the cached online flag.
    pub fn is_online(&self) -> bool {
        self.status.lock().is_online
    }

    /// Registers `listener` for every future transition.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Applies a raw signal. Returns true if it caused a transition, in
    /// which case every subscriber was notified before this returns.
    pub fn handle_signal(&self, signal: ConnectivitySignal) -> bool {
        self.listeners.deliver(|| {
            let next = {
                let mut status = self.status.lock();
                let next = match signal {
                    ConnectivitySignal::Online { connection_type } => NetworkStatus {
                        is_online: true,
                        last_online_time: if status.is_online {
                            status.last_online_time
                        } else {
                            Some(now_millis())
                        },
                        connection_type: connection_type.or_else(|| status.connection_type.clone()),
                    },
                    ConnectivitySignal::Offline => NetworkStatus {
                        is_online: false,
                        last_online_time: status.last_online_time,
                        connection_type: None,
                    },
                };
                if next == *status {
                    return false;
                }
                *status = next.clone();
                next
            };

            info!(
                online = next.is_online,
                connection_type = next.connection_type.as_deref().unwrap_or("unknown"),
                "network status changed"
            );
            for listener in self.listeners.snapshot() {
                listener(&next);
            }
            true
        })
    }

    /// Shorthand for an online/offline signal without connection type.
    pub fn set_online(&self, online: bool) -> bool {
        if online {
            self.handle_signal(ConnectivitySignal::online())
        } else {
            self.handle_signal(ConnectivitySignal::Offline)
        }
    }

    /// Polls `probe` once and applies its answer.
    pub async fn refresh(&self, probe: &dyn ConnectivityProbe) -> bool {
        let signal = probe.probe().await;
        self.handle_signal(signal)
    }
}

impl Default for NetworkStatusMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for NetworkStatusMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStatusMonitor")
            .field("status", &*self.status.lock())
            .field("subscribers", &self.listeners.len())
            .finish()
    }
}

/// Boxed future returned by [`ConnectivityProbe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ConnectivitySignal> + Send + 'a>>;

/// Active connectivity check.
pub trait ConnectivityProbe: Send + Sync {
    /// Checks connectivity once.
    fn probe(&self) -> ProbeFuture<'_>;
}

/// Reports online iff a TCP connection to `addr` succeeds within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a probe for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// The probed address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl ConnectivityProbe for TcpProbe {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr))
                .await
            {
                Ok(Ok(_)) => ConnectivitySignal::online(),
                Ok(Err(e)) => {
                    debug!(addr = %self.addr, error = %e, "connectivity probe failed");
                    ConnectivitySignal::Offline
                }
                Err(_) => {
                    debug!(addr = %self.addr, "connectivity probe timed out");
                    ConnectivitySignal::Offline
                }
            }
        })
    }
}

/// Polls `probe` every `interval` and feeds the answers into `monitor`.
///
/// The task ends when the monitor is dropped or the handle is aborted.
pub fn spawn_probe_loop<P>(
    monitor: &Arc<NetworkStatusMonitor>,
    probe: P,
    interval: Duration,
) -> JoinHandle<()>
where
    P: ConnectivityProbe + 'static,
{
    let monitor: Weak<NetworkStatusMonitor> = Arc::downgrade(monitor);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let signal = probe.probe().await;
            let Some(monitor) = monitor.upgrade() else {
                debug!("network monitor dropped, stopping probe loop");
                break;
            };
            monitor.handle_signal(signal);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FlagProbe(Arc<AtomicBool>);

    impl ConnectivityProbe for FlagProbe {
        fn probe(&self) -> ProbeFuture<'_> {
            let online = self.0.load(Ordering::SeqCst);
            Box::pin(async move {
                if online {
                    ConnectivitySignal::online()
                } else {
                    ConnectivitySignal::Offline
                }
            })
        }
    }

    #[test]
    fn initial_state() {
        let online = NetworkStatusMonitor::new(true);
        assert!(online.is_online());
        assert!(online.status().last_online_time.is_some());

        let offline = NetworkStatusMonitor::new(false);
        assert!(!offline.is_online());
        assert!(offline.status().last_online_time.is_none());
    }

    #[test]
    fn only_transitions_notify() {
        let monitor = NetworkStatusMonitor::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _sub = monitor.subscribe(move |status| seen_in.lock().push(status.is_online));

        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));

        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn last_online_time_moves_only_on_online_transition() {
        let monitor = NetworkStatusMonitor::new(false);
        monitor.set_online(true);
        let first = monitor.status().last_online_time;
        assert!(first.is_some());

        monitor.set_online(true);
        assert_eq!(monitor.status().last_online_time, first);

        monitor.set_online(false);
        assert_eq!(monitor.status().last_online_time, first);
    }

    #[test]
    fn connection_type_change_is_a_transition() {
        let monitor = NetworkStatusMonitor::new(false);
        assert!(monitor.handle_signal(ConnectivitySignal::online_via("wifi")));
        assert!(monitor.handle_signal(ConnectivitySignal::online_via("cellular")));
        assert!(!monitor.handle_signal(ConnectivitySignal::online()));
        assert_eq!(monitor.status().connection_type.as_deref(), Some("cellular"));
    }

    #[test]
    fn every_subscriber_sees_each_transition_once() {
        let monitor = NetworkStatusMonitor::new(true);
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let a_in = Arc::clone(&a);
        let b_in = Arc::clone(&b);
        let _sa = monitor.subscribe(move |_| {
            a_in.fetch_add(1, Ordering::SeqCst);
        });
        let sb = monitor.subscribe(move |_| {
            b_in.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_online(false);
        sb.unsubscribe();
        monitor.set_online(true);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn refresh_applies_probe() {
        let monitor = NetworkStatusMonitor::new(true);
        let flag = Arc::new(AtomicBool::new(false));
        let probe = FlagProbe(Arc::clone(&flag));

        assert!(monitor.refresh(&probe).await);
        assert!(!monitor.is_online());
        assert!(!monitor.refresh(&probe).await);

        flag.store(true, Ordering::SeqCst);
        assert!(monitor.refresh(&probe).await);
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_follows_probe() {
        let monitor = Arc::new(NetworkStatusMonitor::new(true));
        let flag = Arc::new(AtomicBool::new(false));
        let handle = spawn_probe_loop(
            &monitor,
            FlagProbe(Arc::clone(&flag)),
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!monitor.is_online());

        flag.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(monitor.is_online());

        handle.abort();
    }

    #[tokio::test]
    async fn tcp_probe_reports_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let probe = TcpProbe::new(addr.clone(), Duration::from_secs(1));
        assert!(probe.probe().await.is_online());

        drop(listener);
        let probe = TcpProbe::new(addr, Duration::from_secs(1));
        assert!(!probe.probe().await.is_online());
    }
}
