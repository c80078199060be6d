//! LifecycleManager - explicit bulk reset between usage cycles
//!
//! Harnesses that need a clean slate between runs hold one manager and pass it
//! by reference to whatever creates monitors. There is no process-wide
//! instance.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

/// Something that can be cleared between usage cycles
pub trait Resettable: Send + Sync {
    /// Return to the empty state without emitting anything
    fn reset(&self);

    /// Name used in logs
    fn name(&self) -> String;
}

/// Holds resettable handles and resets them together
#[derive(Default)]
pub struct LifecycleManager {
    handles: Mutex<Vec<Arc<dyn Resettable>>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        debug!("LifecycleManager::new: called");
        Self::default()
    }

    /// Track a handle; tracking the same `Arc` twice is a no-op
    pub fn track(&self, handle: Arc<dyn Resettable>) {
        let Ok(mut handles) = self.handles.lock() else {
            warn!("LifecycleManager::track: lock poisoned");
            return;
        };
        if handles.iter().any(|h| Arc::ptr_eq(h, &handle)) {
            debug!(name = %handle.name(), "LifecycleManager::track: already tracked");
            return;
        }
        debug!(name = %handle.name(), "LifecycleManager::track: called");
        handles.push(handle);
    }

    /// Stop tracking a handle
    pub fn untrack(&self, handle: &Arc<dyn Resettable>) -> bool {
        let Ok(mut handles) = self.handles.lock() else {
            warn!("LifecycleManager::untrack: lock poisoned");
            return false;
        };
        let before = handles.len();
        handles.retain(|h| !Arc::ptr_eq(h, handle));
        before != handles.len()
    }

    /// Reset every tracked handle, in tracking order
    pub fn reset_all(&self) -> usize {
        // Snapshot so a handle's reset may track or untrack others
        let snapshot: Vec<Arc<dyn Resettable>> = match self.handles.lock() {
            Ok(handles) => handles.clone(),
            Err(_) => {
                warn!("LifecycleManager::reset_all: lock poisoned");
                return 0;
            }
        };
        for handle in &snapshot {
            debug!(name = %handle.name(), "LifecycleManager::reset_all: resetting");
            handle.reset();
        }
        info!(count = snapshot.len(), "LifecycleManager: reset all handles");
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager").field("handles", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Phase;
    use crate::monitor::{Monitor, Registry};

    #[test]
    fn test_reset_all_clears_tracked_monitors() {
        let manager = LifecycleManager::new();
        let a = Arc::new(Monitor::new(None));
        let b = Arc::new(Monitor::new(None));
        manager.track(a.clone());
        manager.track(b.clone());

        a.record(Phase::Initial).unwrap();
        b.record(Phase::Initial).unwrap();
        b.record(Phase::Update).unwrap();

        assert_eq!(manager.reset_all(), 2);
        assert_eq!(a.count(), 0);
        assert_eq!(b.count(), 0);
    }

    #[test]
    fn test_track_is_idempotent() {
        let manager = LifecycleManager::new();
        let monitor: Arc<dyn Resettable> = Arc::new(Monitor::new(None));
        manager.track(Arc::clone(&monitor));
        manager.track(Arc::clone(&monitor));
        assert_eq!(manager.len(), 1);

        assert!(manager.untrack(&monitor));
        assert!(!manager.untrack(&monitor));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_tracks_registry() {
        let manager = LifecycleManager::new();
        let registry = Arc::new(Registry::new());
        manager.track(registry.clone());

        let monitor = registry.register(None);
        monitor.record(Phase::Initial).unwrap();
        manager.reset_all();
        assert_eq!(monitor.count(), 0);
    }
}
