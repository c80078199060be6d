//! Wait error types

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::events::{Phase, PhaseEvent};

use super::condition::Condition;

/// State observed when a wait settled
#[derive(Clone, Debug)]
pub struct WaitSnapshot {
    /// Total events at settlement
    pub count: usize,
    /// Phase of the most recent event
    pub phase: Option<Phase>,
    /// History at settlement
    pub history: Arc<[PhaseEvent]>,
}

impl WaitSnapshot {
    pub fn from_history(history: Arc<[PhaseEvent]>) -> Self {
        Self {
            count: history.len(),
            phase: history.last().map(|e| e.phase),
            history,
        }
    }

    /// Phases in history order
    pub fn phases(&self) -> Vec<Phase> {
        self.history.iter().map(|e| e.phase).collect()
    }
}

/// Ways a wait can fail
#[derive(Debug, Error)]
pub enum WaitError {
    /// Rejected before any listener or timer was created
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timed out after {timeout:?} waiting for {condition} (observed {count} renders)", count = .observed.count)]
    Timeout {
        condition: Condition,
        timeout: Duration,
        observed: WaitSnapshot,
    },

    /// An exact target was passed before being hit
    #[error("Expected {condition} but the count reached {count} first (target {target})", count = .observed.count)]
    ExceededEarly {
        condition: Condition,
        target: usize,
        observed: WaitSnapshot,
    },

    /// A negated wait saw the condition it expected to stay absent
    #[error("Expected {condition} not to happen, but it did at {count} renders", count = .observed.count)]
    Observed {
        condition: Condition,
        observed: WaitSnapshot,
    },

    /// The monitor was reset while the wait was pending
    #[error("Instance was reset while waiting for {condition}")]
    Detached {
        condition: Condition,
        observed: WaitSnapshot,
    },
}

impl WaitError {
    /// State at settlement, for every variant raised after creation
    pub fn observed(&self) -> Option<&WaitSnapshot> {
        match self {
            WaitError::InvalidArgument(_) => None,
            WaitError::Timeout { observed, .. }
            | WaitError::ExceededEarly { observed, .. }
            | WaitError::Observed { observed, .. }
            | WaitError::Detached { observed, .. } => Some(observed),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    pub fn is_exceeded_early(&self) -> bool {
        matches!(self, WaitError::ExceededEarly { .. })
    }
}
