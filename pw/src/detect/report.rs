//! Loop detection options and results

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::Phase;

/// Default maximum run length for update phases
pub const DEFAULT_MAX_CONSECUTIVE: usize = 10;

/// Maximum number of positions listed in a violation summary
pub const MAX_LISTED_POSITIONS: usize = 10;

/// Errors from loop detection
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Thresholds and presentation options for [`detect_loops`](super::detect_loops)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoopOptions {
    /// Longest allowed run of Update events
    pub max_consecutive_update: usize,

    /// Longest allowed run of NestedUpdate events (defaults to the update limit)
    pub max_consecutive_nested_update: Option<usize>,

    /// Non-initial events to skip before counting, consumed once across the
    /// whole history
    pub ignore_initial_count: usize,

    /// Label carried into the report
    pub component_label: Option<String>,

    /// Include the full phase history in a violation report
    pub show_full_history: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_consecutive_update: DEFAULT_MAX_CONSECUTIVE,
            max_consecutive_nested_update: None,
            ignore_initial_count: 0,
            component_label: None,
            show_full_history: false,
        }
    }
}

impl LoopOptions {
    /// Reject thresholds that could never describe a run
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.max_consecutive_update == 0 {
            return Err(DetectError::InvalidArgument(
                "max-consecutive-update must be a positive integer".to_string(),
            ));
        }
        if self.max_consecutive_nested_update == Some(0) {
            return Err(DetectError::InvalidArgument(
                "max-consecutive-nested-update must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// Threshold applied to runs of `phase`; Initial is never thresholded
    pub fn threshold_for(&self, phase: Phase) -> Option<usize> {
        match phase {
            Phase::Initial => None,
            Phase::Update => Some(self.max_consecutive_update),
            Phase::NestedUpdate => Some(
                self.max_consecutive_nested_update
                    .unwrap_or(self.max_consecutive_update),
            ),
        }
    }
}

/// Longest counted run per non-initial phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MaxRuns {
    pub update: usize,
    pub nested_update: usize,
}

impl MaxRuns {
    pub fn get(&self, phase: Phase) -> usize {
        match phase {
            Phase::Initial => 0,
            Phase::Update => self.update,
            Phase::NestedUpdate => self.nested_update,
        }
    }

    /// Raise the maximum for `phase` if `len` is strictly greater
    pub(crate) fn observe(&mut self, phase: Phase, len: usize) {
        let slot = match phase {
            Phase::Initial => return,
            Phase::Update => &mut self.update,
            Phase::NestedUpdate => &mut self.nested_update,
        };
        if len > *slot {
            *slot = len;
        }
    }
}

/// A run that exceeded its threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoopViolation {
    pub phase: Phase,
    pub run_length: usize,
    pub threshold: usize,
    /// First counted position of the run (1-indexed in the full history)
    pub start_pos: usize,
    /// Position where the threshold was crossed (1-indexed, inclusive)
    pub end_pos: usize,
    /// Longest runs seen up to and including the violating run
    pub max_runs_observed: MaxRuns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_label: Option<String>,
    /// Full phase history, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Phase>>,
}

impl LoopViolation {
    /// Positions of the offending run
    pub fn positions(&self) -> std::ops::RangeInclusive<usize> {
        self.start_pos..=self.end_pos
    }

    /// Offending positions, capped at [`MAX_LISTED_POSITIONS`] with a "+N more" suffix
    pub fn positions_summary(&self) -> String {
        let total = (self.end_pos + 1).saturating_sub(self.start_pos);
        let listed: Vec<String> = self
            .positions()
            .take(MAX_LISTED_POSITIONS)
            .map(|p| p.to_string())
            .collect();
        let mut summary = listed.join(", ");
        if total > MAX_LISTED_POSITIONS {
            summary.push_str(&format!(", +{} more", total - MAX_LISTED_POSITIONS));
        }
        summary
    }
}

/// Outcome of a loop scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum LoopReport {
    /// No run exceeded its threshold
    #[serde(rename_all = "kebab-case")]
    Clean {
        max_runs_observed: MaxRuns,
        events_scanned: usize,
    },
    /// The first run that exceeded its threshold
    Violation(LoopViolation),
}

impl LoopReport {
    pub fn is_clean(&self) -> bool {
        matches!(self, LoopReport::Clean { .. })
    }

    pub fn violation(&self) -> Option<&LoopViolation> {
        match self {
            LoopReport::Violation(v) => Some(v),
            LoopReport::Clean { .. } => None,
        }
    }

    pub fn max_runs_observed(&self) -> MaxRuns {
        match self {
            LoopReport::Clean { max_runs_observed, .. } => *max_runs_observed,
            LoopReport::Violation(v) => v.max_runs_observed,
        }
    }
}
