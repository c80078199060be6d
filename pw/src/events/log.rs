//! EventLog - append-only phase history with derived caches
//!
//! Every monitored instance owns one EventLog. Reads are served from caches
//! that are keyed by a version counter bumped on each append:
//! - The full-history snapshot is invalidated on every append
//! - A per-phase subset is invalidated only when that phase is appended
//! - Aggregate metrics are valid only while the version is unchanged
//!
//! All operations are total. A poisoned lock is recovered rather than
//! propagated, since no critical section in this module can panic mid-update.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{Phase, PhaseEvent};

/// Per-phase event counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PhaseCounts {
    pub initial: usize,
    pub update: usize,
    pub nested_update: usize,
}

impl PhaseCounts {
    pub fn get(&self, phase: Phase) -> usize {
        match phase {
            Phase::Initial => self.initial,
            Phase::Update => self.update,
            Phase::NestedUpdate => self.nested_update,
        }
    }

    pub fn total(&self) -> usize {
        self.initial + self.update + self.nested_update
    }
}

/// A cached reduction result
struct CachedAggregate {
    version: u64,
    epoch: u64,
    value: Arc<dyn Any + Send + Sync>,
}

/// Derived views over the event vector
#[derive(Default)]
struct DerivedCache {
    history: Option<Arc<[PhaseEvent]>>,
    by_phase: HashMap<Phase, Arc<[PhaseEvent]>>,
    aggregates: HashMap<&'static str, CachedAggregate>,
}

#[derive(Default)]
struct LogInner {
    events: Vec<PhaseEvent>,
    /// Bumped on every append, reset on clear
    version: u64,
    /// Bumped on every clear so that a reset version never revives old cache entries
    epoch: u64,
    cache: DerivedCache,
}

impl LogInner {
    fn push(&mut self, phase: Phase, duration_ms: Option<f64>) -> PhaseEvent {
        let event = PhaseEvent::new(phase, self.events.len() + 1, duration_ms);
        debug!(%phase, seq = event.sequence_index, "EventLog::append: called");

        self.events.push(event.clone());
        self.version += 1;

        // Selective invalidation: other phase buckets stay valid
        self.cache.history = None;
        self.cache.by_phase.remove(&phase);

        event
    }

    fn history(&mut self) -> Arc<[PhaseEvent]> {
        if let Some(history) = &self.cache.history {
            return Arc::clone(history);
        }
        debug!(len = self.events.len(), version = self.version, "EventLog: rebuilding history snapshot");
        let history: Arc<[PhaseEvent]> = self.events.clone().into();
        self.cache.history = Some(Arc::clone(&history));
        history
    }
}

/// Append-only history of one monitored instance
#[derive(Default)]
pub struct EventLog {
    inner: Mutex<LogInner>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        debug!("EventLog::new: called");
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("EventLog: lock poisoned, recovering inner state");
            poisoned.into_inner()
        })
    }

    /// Append a phase and return the recorded event
    pub fn append(&self, phase: Phase) -> PhaseEvent {
        self.append_timed(phase, None)
    }

    /// Append a phase with an optional render duration
    pub fn append_timed(&self, phase: Phase, duration_ms: Option<f64>) -> PhaseEvent {
        self.lock().push(phase, duration_ms)
    }

    /// Append and return the history snapshot that ends with the new event
    ///
    /// Both come from one lock acquisition, so `history.len()` always equals
    /// the event's sequence index.
    pub fn append_with_history(&self, phase: Phase, duration_ms: Option<f64>) -> (PhaseEvent, Arc<[PhaseEvent]>) {
        let mut inner = self.lock();
        let event = inner.push(phase, duration_ms);
        let history = inner.history();
        (event, history)
    }

    /// Immutable snapshot of the full history
    ///
    /// Repeated calls between appends return the same `Arc`.
    pub fn history(&self) -> Arc<[PhaseEvent]> {
        self.lock().history()
    }

    /// Immutable subset of events with the given phase
    pub fn by_phase(&self, phase: Phase) -> Arc<[PhaseEvent]> {
        let mut inner = self.lock();
        if let Some(subset) = inner.cache.by_phase.get(&phase) {
            return Arc::clone(subset);
        }
        debug!(%phase, "EventLog::by_phase: rebuilding phase bucket");
        let subset: Arc<[PhaseEvent]> = inner.events.iter().filter(|e| e.phase == phase).cloned().collect();
        inner.cache.by_phase.insert(phase, Arc::clone(&subset));
        subset
    }

    /// Cached reduction over the full history
    ///
    /// The result is cached under `key` until the next append. The reducer runs
    /// outside the log lock, so it may freely read from this log.
    pub fn aggregate<T, F>(&self, key: &'static str, reduce: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&[PhaseEvent]) -> T,
    {
        let (history, version, epoch) = {
            let mut inner = self.lock();
            if let Some(cached) = inner.cache.aggregates.get(key)
                && cached.version == inner.version
                && cached.epoch == inner.epoch
                && let Some(value) = cached.value.downcast_ref::<T>()
            {
                debug!(key, version = inner.version, "EventLog::aggregate: cache hit");
                return value.clone();
            }
            (inner.history(), inner.version, inner.epoch)
        };

        debug!(key, version, "EventLog::aggregate: recomputing");
        let value = reduce(&history);

        let mut inner = self.lock();
        if inner.version == version && inner.epoch == epoch {
            inner.cache.aggregates.insert(
                key,
                CachedAggregate {
                    version,
                    epoch,
                    value: Arc::new(value.clone()),
                },
            );
        }
        value
    }

    /// Mean reported render duration, 0.0 when no event carries one
    pub fn average_duration_ms(&self) -> f64 {
        self.aggregate("average_duration_ms", |events| {
            let (sum, count) = events
                .iter()
                .filter_map(|e| e.duration_ms)
                .fold((0.0, 0usize), |(sum, count), d| (sum + d, count + 1));
            if count == 0 { 0.0 } else { sum / count as f64 }
        })
    }

    /// Sum of reported render durations
    pub fn total_duration_ms(&self) -> f64 {
        self.aggregate("total_duration_ms", |events| events.iter().filter_map(|e| e.duration_ms).sum())
    }

    /// Number of events per phase
    pub fn phase_counts(&self) -> PhaseCounts {
        self.aggregate("phase_counts", |events| {
            events.iter().fold(PhaseCounts::default(), |mut counts, e| {
                match e.phase {
                    Phase::Initial => counts.initial += 1,
                    Phase::Update => counts.update += 1,
                    Phase::NestedUpdate => counts.nested_update += 1,
                }
                counts
            })
        })
    }

    /// Most recent event
    pub fn latest(&self) -> Option<PhaseEvent> {
        self.lock().events.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cache version (number of appends since the last clear)
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Truncate to empty and drop every cache
    pub fn clear(&self) {
        let mut inner = self.lock();
        debug!(len = inner.events.len(), "EventLog::clear: called");
        inner.events.clear();
        inner.version = 0;
        inner.epoch += 1;
        inner.cache = DerivedCache::default();
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventLog")
            .field("len", &inner.events.len())
            .field("version", &inner.version)
            .finish()
    }
}
