//! Wait conditions and options

use std::fmt;
use std::time::Duration;

use crate::events::Phase;

use super::error::WaitError;

/// Default wait timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// What a wait is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    /// Exactly this many events in total; overshooting fails early
    ExactCount(usize),
    /// At least this many events in total
    MinCount(usize),
    /// The most recent event has this phase
    PhaseReached(Phase),
    /// Exactly this many events since the monitor's stored baseline
    Rerenders(usize),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::ExactCount(n) => write!(f, "exactly {} renders", n),
            Condition::MinCount(n) => write!(f, "at least {} renders", n),
            Condition::PhaseReached(phase) => write!(f, "phase {}", phase),
            Condition::Rerenders(n) => write!(f, "{} rerenders since baseline", n),
        }
    }
}

/// Result of checking a predicate against the current state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Evaluation {
    Pending,
    Satisfied,
    /// An exact target was passed without being hit
    Exceeded,
}

/// A condition resolved against absolute counts at wait creation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Predicate {
    Exact(usize),
    AtLeast(usize),
    Phase(Phase),
}

impl Predicate {
    /// Resolve relative conditions using the baseline captured at creation
    pub(crate) fn resolve(condition: Condition, baseline: usize) -> Self {
        match condition {
            Condition::ExactCount(n) => Predicate::Exact(n),
            Condition::MinCount(n) => Predicate::AtLeast(n),
            Condition::PhaseReached(phase) => Predicate::Phase(phase),
            Condition::Rerenders(n) => Predicate::Exact(baseline.saturating_add(n)),
        }
    }

    pub(crate) fn evaluate(&self, count: usize, latest: Option<Phase>) -> Evaluation {
        match *self {
            Predicate::Exact(target) if count == target => Evaluation::Satisfied,
            Predicate::Exact(target) if count > target => Evaluation::Exceeded,
            Predicate::AtLeast(target) if count >= target => Evaluation::Satisfied,
            Predicate::Phase(phase) if latest == Some(phase) => Evaluation::Satisfied,
            _ => Evaluation::Pending,
        }
    }

    /// Absolute count target for exact predicates
    pub(crate) fn exact_target(&self) -> Option<usize> {
        match *self {
            Predicate::Exact(target) => Some(target),
            _ => None,
        }
    }
}

/// Options shared by all waits
///
/// A `WaitOptions` value is always valid: the timeout is finite and positive.
/// Invalid input is rejected here, before any listener or timer exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    timeout: Duration,
}

impl WaitOptions {
    pub fn new(timeout: Duration) -> Result<Self, WaitError> {
        if timeout.is_zero() {
            return Err(WaitError::InvalidArgument(
                "timeout must be a positive duration".to_string(),
            ));
        }
        Ok(Self { timeout })
    }

    /// Build from a millisecond value of unknown provenance
    pub fn from_millis(timeout_ms: f64) -> Result<Self, WaitError> {
        if !timeout_ms.is_finite() || timeout_ms <= 0.0 {
            return Err(WaitError::InvalidArgument(format!(
                "timeout must be a finite positive number of milliseconds, got {}",
                timeout_ms
            )));
        }
        let timeout = Duration::try_from_secs_f64(timeout_ms / 1000.0).map_err(|e| {
            WaitError::InvalidArgument(format!("timeout of {} milliseconds is out of range: {}", timeout_ms, e))
        })?;
        Self::new(timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_predicate() {
        let p = Predicate::Exact(2);
        assert_eq!(p.evaluate(1, None), Evaluation::Pending);
        assert_eq!(p.evaluate(2, None), Evaluation::Satisfied);
        assert_eq!(p.evaluate(3, None), Evaluation::Exceeded);
    }

    #[test]
    fn test_at_least_predicate_never_exceeds() {
        let p = Predicate::AtLeast(2);
        assert_eq!(p.evaluate(1, None), Evaluation::Pending);
        assert_eq!(p.evaluate(2, None), Evaluation::Satisfied);
        assert_eq!(p.evaluate(9, None), Evaluation::Satisfied);
    }

    #[test]
    fn test_phase_predicate_uses_latest() {
        let p = Predicate::Phase(Phase::NestedUpdate);
        assert_eq!(p.evaluate(3, Some(Phase::Update)), Evaluation::Pending);
        assert_eq!(p.evaluate(4, Some(Phase::NestedUpdate)), Evaluation::Satisfied);
        assert_eq!(p.evaluate(0, None), Evaluation::Pending);
    }

    #[test]
    fn test_rerenders_resolve_against_baseline() {
        let p = Predicate::resolve(Condition::Rerenders(2), 5);
        assert_eq!(p, Predicate::Exact(7));
        assert_eq!(p.exact_target(), Some(7));
    }

    #[test]
    fn test_options_validation() {
        assert!(WaitOptions::new(Duration::ZERO).is_err());
        assert!(WaitOptions::from_millis(f64::NAN).is_err());
        assert!(WaitOptions::from_millis(f64::INFINITY).is_err());
        assert!(WaitOptions::from_millis(-5.0).is_err());
        assert!(WaitOptions::from_millis(0.0).is_err());

        let err = WaitOptions::from_millis(1e30).unwrap_err();
        assert!(matches!(err, WaitError::InvalidArgument(_)));
        assert!(err.to_string().contains("out of range"));

        let opts = WaitOptions::from_millis(250.0).unwrap();
        assert_eq!(opts.timeout(), Duration::from_millis(250));
        assert_eq!(WaitOptions::default().timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_condition_display() {
        assert_eq!(Condition::ExactCount(3).to_string(), "exactly 3 renders");
        assert_eq!(Condition::PhaseReached(Phase::Update).to_string(), "phase update");
    }
}
