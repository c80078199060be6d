//! Event Bus - synchronous fan-out of phase notifications
//!
//! The EventBus keeps an order-preserving set of listeners for one monitored
//! instance. `emit` calls every listener inline, in subscription order, with the
//! same notification reference. Delivery is synchronous so that a waiter
//! observes an append before the producer's `record` call returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use thiserror::Error;
use tracing::{debug, warn};

use super::types::PhaseNotification;

/// Result returned by a listener callback
pub type ListenerResult = eyre::Result<()>;

/// Shared listener callback
///
/// Identity is the `Arc` allocation: subscribing a clone of the same `Arc`
/// twice registers it once.
pub type Listener = Arc<dyn Fn(&PhaseNotification) -> ListenerResult + Send + Sync>;

/// Wrap a closure as a [`Listener`]
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&PhaseNotification) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Errors surfaced by [`EventBus::emit`]
#[derive(Debug, Error)]
pub enum BusError {
    /// One or more listeners returned an error; all listeners were still invoked
    #[error("{failed} of {delivered} listeners failed, first error: {first}")]
    ListenerFailed {
        failed: usize,
        delivered: usize,
        first: String,
    },
}

struct Registration {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct BusInner {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) {
        match self.listeners.write() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|r| r.id != id);
                debug!(id, removed = before != listeners.len(), "EventBus: remove listener");
            }
            Err(_) => {
                warn!(id, "EventBus: listeners lock poisoned, cannot remove listener");
            }
        }
    }
}

/// Per-instance observer registry
#[derive(Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        debug!("EventBus::new: called");
        Self::default()
    }

    /// Register a listener
    ///
    /// Subscribing an already registered listener is a no-op; the returned
    /// handle then refers to the existing registration.
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        let Ok(mut listeners) = self.inner.listeners.write() else {
            warn!("EventBus::subscribe: listeners lock poisoned, returning inert subscription");
            return Subscription::inert();
        };

        if let Some(existing) = listeners
            .iter()
            .find(|r| std::ptr::addr_eq(Arc::as_ptr(&r.listener), Arc::as_ptr(&listener)))
        {
            debug!(id = existing.id, "EventBus::subscribe: listener already registered");
            return Subscription::new(existing.id, Arc::downgrade(&self.inner));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        listeners.push(Registration { id, listener });
        debug!(id, count = listeners.len(), "EventBus::subscribe: new subscriber");
        Subscription::new(id, Arc::downgrade(&self.inner))
    }

    /// Deliver a notification to every registered listener
    ///
    /// The listener set is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside their callback. A failing listener does not stop
    /// delivery to the rest; failures are reported after full fan-out.
    pub fn emit(&self, notification: &PhaseNotification) -> Result<usize, BusError> {
        let snapshot: Vec<(u64, Listener)> = match self.inner.listeners.read() {
            Ok(listeners) => listeners.iter().map(|r| (r.id, Arc::clone(&r.listener))).collect(),
            Err(_) => {
                warn!("EventBus::emit: listeners lock poisoned, dropping notification");
                return Ok(0);
            }
        };
        debug!(
            count = notification.count,
            phase = %notification.phase,
            listeners = snapshot.len(),
            "EventBus::emit"
        );

        let mut failures = Vec::new();
        for (id, listener) in &snapshot {
            if let Err(e) = listener(notification) {
                warn!(id, error = %e, "EventBus::emit: listener failed");
                failures.push(e);
            }
        }

        match failures.first() {
            None => Ok(snapshot.len()),
            Some(first) => Err(BusError::ListenerFailed {
                failed: failures.len(),
                delivered: snapshot.len(),
                first: format!("{:#}", first),
            }),
        }
    }

    /// Remove every listener
    pub fn clear(&self) {
        match self.inner.listeners.write() {
            Ok(mut listeners) => {
                debug!(count = listeners.len(), "EventBus::clear: called");
                listeners.clear();
            }
            Err(_) => warn!("EventBus::clear: listeners lock poisoned"),
        }
    }

    pub fn has_listeners(&self) -> bool {
        self.listener_count() > 0
    }

    /// Get the number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

/// Handle that removes a listener from its bus
///
/// `unsubscribe` is idempotent and stays safe after the bus was cleared or
/// dropped.
#[derive(Clone, Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    fn new(id: u64, bus: Weak<BusInner>) -> Self {
        Self {
            id,
            bus,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    fn inert() -> Self {
        Self {
            id: u64::MAX,
            bus: Weak::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Remove the listener from the bus
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            debug!(id = self.id, "Subscription::unsubscribe: already released");
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        } else {
            debug!(id = self.id, "Subscription::unsubscribe: bus dropped");
        }
    }

    /// Whether this handle has not been released yet
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
