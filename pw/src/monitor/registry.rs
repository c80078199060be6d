//! Registry - identity-token keyed lookup of live monitors
//!
//! The registry never owns a monitor: it keeps `Weak` references, so a
//! monitor's lifetime follows whoever holds the `Arc` returned by `register`.
//! Dead entries are pruned on access.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, info, warn};

use super::instance::{InstanceId, Monitor};
use super::lifecycle::Resettable;

/// Association from identity token to monitor
#[derive(Debug, Default)]
pub struct Registry {
    monitors: RwLock<HashMap<InstanceId, Weak<Monitor>>>,
}

impl Registry {
    pub fn new() -> Self {
        debug!("Registry::new: called");
        Self::default()
    }

    /// Create and register a monitor; the caller owns the returned handle
    pub fn register(&self, label: Option<String>) -> Arc<Monitor> {
        let monitor = Arc::new(Monitor::new(label));
        self.insert(&monitor);
        monitor
    }

    /// Register an existing monitor
    pub fn insert(&self, monitor: &Arc<Monitor>) {
        let id = monitor.id();
        match self.monitors.write() {
            Ok(mut monitors) => {
                monitors.retain(|_, weak| weak.strong_count() > 0);
                monitors.insert(id, Arc::downgrade(monitor));
                info!(%id, label = ?monitor.label(), live = monitors.len(), "Registry: registered monitor");
            }
            Err(_) => warn!(%id, "Registry::insert: lock poisoned, monitor not registered"),
        }
    }

    /// Look up a live monitor
    pub fn get(&self, id: &InstanceId) -> Option<Arc<Monitor>> {
        debug!(%id, "Registry::get: called");
        self.monitors.read().ok()?.get(id)?.upgrade()
    }

    /// Reset and forget a monitor
    ///
    /// Returns false if the id is unknown or its monitor was already dropped.
    pub fn dispose(&self, id: &InstanceId) -> bool {
        debug!(%id, "Registry::dispose: called");
        let removed = match self.monitors.write() {
            Ok(mut monitors) => monitors.remove(id),
            Err(_) => {
                warn!(%id, "Registry::dispose: lock poisoned");
                None
            }
        };
        match removed.and_then(|weak| weak.upgrade()) {
            Some(monitor) => {
                monitor.reset();
                true
            }
            None => false,
        }
    }

    /// All live monitors
    pub fn live(&self) -> Vec<Arc<Monitor>> {
        match self.monitors.read() {
            Ok(monitors) => monitors.values().filter_map(Weak::upgrade).collect(),
            Err(_) => {
                warn!("Registry::live: lock poisoned");
                Vec::new()
            }
        }
    }

    /// Number of live monitors
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Resettable for Registry {
    /// Reset every live monitor, keeping registrations
    fn reset(&self) {
        let live = self.live();
        debug!(count = live.len(), "Registry::reset: resetting live monitors");
        for monitor in live {
            monitor.reset();
        }
    }

    fn name(&self) -> String {
        "registry".to_string()
    }
}
