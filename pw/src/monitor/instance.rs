//! Monitor - one observed instance with its log and bus

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{BusError, EventBus, EventLog, Listener, Phase, PhaseEvent, PhaseNotification, Subscription};
use crate::wait::Waiter;

use super::lifecycle::Resettable;

/// Opaque identity token issued per monitored instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Issue a fresh, time-ordered identity
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the short prefix (first 8 chars) for display
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One monitored instance
///
/// Owns an isolated [`EventLog`] and [`EventBus`]. The rerender baseline is a
/// stored history length used by "renders since" queries and waits.
#[derive(Debug)]
pub struct Monitor {
    id: InstanceId,
    label: Option<String>,
    log: EventLog,
    bus: EventBus,
    baseline: AtomicUsize,
}

impl Monitor {
    /// Create a monitor with a fresh identity
    pub fn new(label: Option<String>) -> Self {
        Self::with_id(InstanceId::new(), label)
    }

    /// Create a monitor with a known identity
    pub fn with_id(id: InstanceId, label: Option<String>) -> Self {
        debug!(%id, ?label, "Monitor::new: called");
        Self {
            id,
            label,
            log: EventLog::new(),
            bus: EventBus::new(),
            baseline: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Label for reports, falling back to the short identity
    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.id.short())
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Record one observed lifecycle transition
    ///
    /// Appends to the log, then delivers the notification to every listener
    /// before returning. Listener failures are reported after full fan-out;
    /// the event is recorded either way.
    pub fn record(&self, phase: Phase) -> Result<PhaseEvent, BusError> {
        self.record_timed(phase, None)
    }

    /// Record a transition with its render duration
    pub fn record_timed(&self, phase: Phase, duration_ms: Option<f64>) -> Result<PhaseEvent, BusError> {
        if !self.bus.has_listeners() {
            let event = self.log.append_timed(phase, duration_ms);
            debug!(id = %self.id, %phase, seq = event.sequence_index, "Monitor::record: called");
            return Ok(event);
        }

        let (event, history) = self.log.append_with_history(phase, duration_ms);
        debug!(id = %self.id, %phase, seq = event.sequence_index, "Monitor::record: called");
        let notification = PhaseNotification {
            count: event.sequence_index,
            phase,
            history,
        };
        self.bus.emit(&notification)?;
        Ok(event)
    }

    /// Register a listener for future records
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        self.bus.subscribe(listener)
    }

    pub fn history(&self) -> Arc<[PhaseEvent]> {
        self.log.history()
    }

    pub fn by_phase(&self, phase: Phase) -> Arc<[PhaseEvent]> {
        self.log.by_phase(phase)
    }

    /// Number of recorded events
    pub fn count(&self) -> usize {
        self.log.len()
    }

    /// Phase of the most recent event
    pub fn latest_phase(&self) -> Option<Phase> {
        self.log.latest().map(|e| e.phase)
    }

    /// Store the current history length as the rerender baseline
    pub fn mark_baseline(&self) -> usize {
        let count = self.count();
        self.baseline.store(count, Ordering::Release);
        debug!(id = %self.id, count, "Monitor::mark_baseline: called");
        count
    }

    pub fn baseline(&self) -> usize {
        self.baseline.load(Ordering::Acquire)
    }

    /// Events recorded since the stored baseline
    pub fn rerenders_since_baseline(&self) -> usize {
        self.count().saturating_sub(self.baseline())
    }

    /// Waiter bound to this monitor
    pub fn waiter(self: &Arc<Self>) -> Waiter {
        Waiter::new(Arc::clone(self))
    }

    /// Clear history, listeners and baseline for the next usage cycle
    ///
    /// Never emits. Waits still pending on this monitor settle as detached.
    pub fn reset(&self) {
        info!(id = %self.id, count = self.count(), "Monitor::reset: clearing instance");
        self.log.clear();
        self.bus.clear();
        self.baseline.store(0, Ordering::Release);
    }
}

impl Resettable for Monitor {
    fn reset(&self) {
        Monitor::reset(self);
    }

    fn name(&self) -> String {
        format!("monitor:{}", self.display_name())
    }
}
