//! Callback registry shared by the network monitor and the status publisher.

use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::{Arc, Weak};

struct Registry<F: ?Sized> {
    next_id: u64,
    listeners: Vec<(u64, Arc<F>)>,
}

/// Set of registered callbacks.
///
/// Callbacks are invoked on a cloned list, so a callback may subscribe or
/// unsubscribe without deadlocking. Deliveries wrapped in
/// [`ListenerSet::deliver`] are serialized across threads but re-entrant on
/// the delivering thread.
pub(crate) struct ListenerSet<F: ?Sized> {
    registry: Arc<Mutex<Registry<F>>>,
    delivery: ReentrantMutex<()>,
}

impl<F: ?Sized + Send + Sync + 'static> ListenerSet<F> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Registers a callback; it stays registered while the returned
    /// subscription lives.
    pub(crate) fn add(&self, listener: Arc<F>) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, listener));
            id
        };

        let registry: Weak<Mutex<Registry<F>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().listeners.retain(|(other, _)| *other != id);
            }
        })
    }

    /// The currently registered callbacks, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.registry
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    /// Runs `f` while holding the delivery guard.
    pub(crate) fn deliver<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.delivery.lock();
        f()
    }
}

/// Handle of a registered callback.
///
/// The callback is deregistered when the handle is dropped or
/// [`Subscription::unsubscribe`] is called. Use [`Subscription::detach`] to
/// keep it for the lifetime of its source.
#[must_use = "dropping a Subscription deregisters the callback"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Deregisters the callback.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the callback registered without holding the handle.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
