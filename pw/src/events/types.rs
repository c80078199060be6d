//! Phase event types
//!
//! These types describe everything the core observes about a monitored instance:
//! - The lifecycle phase of each observation (initial, update, nested update)
//! - The recorded event with its position in the history
//! - The payload handed to bus listeners on every append

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle phase of a single observation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// First observation of an instance (mount)
    Initial,
    /// Subsequent observation caused by changed inputs
    Update,
    /// Observation triggered synchronously while committing a prior update
    NestedUpdate,
}

impl Phase {
    /// Every phase, in declaration order
    pub const ALL: [Phase; 3] = [Phase::Initial, Phase::Update, Phase::NestedUpdate];

    /// Stable name used in logs, files and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::Update => "update",
            Phase::NestedUpdate => "nested-update",
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, Phase::Initial)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "Phase::from_str: called");
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "initial" | "mount" => Ok(Phase::Initial),
            "update" => Ok(Phase::Update),
            "nested-update" | "nestedupdate" | "nested" => Ok(Phase::NestedUpdate),
            _ => Err(format!(
                "Unknown phase: {}. Use: initial, update, or nested-update",
                s
            )),
        }
    }
}

/// A single recorded observation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvent {
    /// Phase of this observation
    pub phase: Phase,
    /// Position in the history (1-based, dense)
    #[serde(rename = "seq")]
    pub sequence_index: usize,
    /// Wall-clock time the event was appended
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Render duration reported by the producer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl PhaseEvent {
    /// Create an event stamped with the current time
    pub fn new(phase: Phase, sequence_index: usize, duration_ms: Option<f64>) -> Self {
        Self {
            phase,
            sequence_index,
            timestamp: Utc::now(),
            duration_ms,
        }
    }
}

/// Payload delivered to every bus listener for one append
///
/// The same value is passed by reference to all listeners of one emit, so
/// `history` is pointer-identical across them.
#[derive(Clone, Debug)]
pub struct PhaseNotification {
    /// Total number of events after the append
    pub count: usize,
    /// Phase that was just appended
    pub phase: Phase,
    /// Immutable history view including the new event
    pub history: Arc<[PhaseEvent]>,
}

impl PhaseNotification {
    /// The event that triggered this notification
    pub fn latest(&self) -> Option<&PhaseEvent> {
        self.history.last()
    }
}

/// A persisted history line for file storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Identity token of the instance that produced the event
    pub instance: String,
    /// Human-readable label of the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// The event
    pub event: PhaseEvent,
}

impl HistoryEntry {
    pub fn new(instance: impl Into<String>, label: Option<String>, event: PhaseEvent) -> Self {
        Self {
            instance: instance.into(),
            label,
            event,
        }
    }
}
