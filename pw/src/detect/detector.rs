//! Run scanner

use tracing::{debug, info, warn};

use crate::events::{Phase, PhaseEvent};

use super::report::{DetectError, LoopOptions, LoopReport, LoopViolation, MaxRuns};

/// The run currently being counted
#[derive(Debug, Clone, Copy)]
struct CurrentRun {
    phase: Phase,
    length: usize,
    /// 1-indexed position of the first counted event
    start_pos: usize,
}

/// Scan a history for a same-phase run longer than its threshold
///
/// The scan stops at the first violation. An Initial event ends every run, so
/// separate usage cycles never add up. The `ignore_initial_count` budget is
/// spent once, on the first non-initial events of the whole history, and
/// skipped events never count toward a run.
pub fn detect_loops(events: &[PhaseEvent], options: &LoopOptions) -> Result<LoopReport, DetectError> {
    debug!(
        events = events.len(),
        max_update = options.max_consecutive_update,
        max_nested = ?options.max_consecutive_nested_update,
        ignore = options.ignore_initial_count,
        "detect_loops: called"
    );
    options.validate()?;

    let mut max_runs = MaxRuns::default();
    let mut current: Option<CurrentRun> = None;
    let mut skip_budget = options.ignore_initial_count;

    for (index, event) in events.iter().enumerate() {
        let pos = index + 1;

        if event.phase.is_initial() {
            if let Some(run) = current.take() {
                max_runs.observe(run.phase, run.length);
            }
            continue;
        }

        // A different non-initial phase ends the current run
        if let Some(run) = current
            && run.phase != event.phase
        {
            max_runs.observe(run.phase, run.length);
            current = None;
        }

        if skip_budget > 0 {
            skip_budget -= 1;
            continue;
        }

        let run = current.get_or_insert(CurrentRun {
            phase: event.phase,
            length: 0,
            start_pos: pos,
        });
        run.length += 1;

        let Some(threshold) = options.threshold_for(event.phase) else {
            continue;
        };
        if run.length > threshold {
            max_runs.observe(run.phase, run.length);
            let violation = LoopViolation {
                phase: run.phase,
                run_length: run.length,
                threshold,
                start_pos: run.start_pos,
                end_pos: pos,
                max_runs_observed: max_runs,
                component_label: options.component_label.clone(),
                history: options
                    .show_full_history
                    .then(|| events.iter().map(|e| e.phase).collect()),
            };
            warn!(
                label = ?violation.component_label,
                phase = %violation.phase,
                run_length = violation.run_length,
                threshold,
                start_pos = violation.start_pos,
                end_pos = violation.end_pos,
                "detect_loops: run exceeded threshold"
            );
            return Ok(LoopReport::Violation(violation));
        }
    }

    // A run that reaches the last event still counts toward the maximum
    if let Some(run) = current {
        max_runs.observe(run.phase, run.length);
    }

    info!(
        events = events.len(),
        max_update = max_runs.update,
        max_nested = max_runs.nested_update,
        "detect_loops: no loop found"
    );
    Ok(LoopReport::Clean {
        max_runs_observed: max_runs,
        events_scanned: events.len(),
    })
}

/// Convenience wrapper over a bare phase sequence
pub fn detect_loops_in_phases(phases: &[Phase], options: &LoopOptions) -> Result<LoopReport, DetectError> {
    let events: Vec<PhaseEvent> = phases
        .iter()
        .enumerate()
        .map(|(i, phase)| PhaseEvent::new(*phase, i + 1, None))
        .collect();
    detect_loops(&events, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use Phase::{Initial as I, NestedUpdate as N, Update as U};

    fn seq(parts: &[(Phase, usize)]) -> Vec<Phase> {
        parts
            .iter()
            .flat_map(|(phase, n)| std::iter::repeat_n(*phase, *n))
            .collect()
    }

    fn with_threshold(max: usize) -> LoopOptions {
        LoopOptions {
            max_consecutive_update: max,
            ..Default::default()
        }
    }

    #[test]
    fn test_mount_then_eleven_updates() {
        let phases = seq(&[(I, 1), (U, 11)]);
        let report = detect_loops_in_phases(&phases, &LoopOptions::default()).unwrap();
        let v = report.violation().expect("should be flagged");
        assert_eq!(v.phase, Phase::Update);
        assert_eq!(v.run_length, 11);
        assert_eq!(v.threshold, 10);
        assert_eq!(v.start_pos, 2);
        assert_eq!(v.end_pos, 12);
    }

    #[test]
    fn test_run_at_threshold_not_flagged() {
        let phases = seq(&[(I, 1), (U, 10)]);
        let report = detect_loops_in_phases(&phases, &LoopOptions::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.max_runs_observed().update, 10);
    }

    #[test]
    fn test_one_past_threshold_flagged() {
        let phases = seq(&[(U, 4)]);
        let report = detect_loops_in_phases(&phases, &with_threshold(3)).unwrap();
        assert_eq!(report.violation().map(|v| v.run_length), Some(4));
    }

    #[test]
    fn test_initial_resets_counters() {
        let phases = seq(&[(I, 1), (U, 6), (I, 1), (U, 6)]);
        let report = detect_loops_in_phases(&phases, &LoopOptions::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.max_runs_observed().update, 6);
    }

    #[test]
    fn test_phases_are_exclusive() {
        // Alternating phases never build a run
        let phases: Vec<Phase> = (0..40).map(|i| if i % 2 == 0 { U } else { N }).collect();
        let report = detect_loops_in_phases(&phases, &with_threshold(2)).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.max_runs_observed(), MaxRuns { update: 1, nested_update: 1 });
    }

    #[test]
    fn test_nested_threshold_falls_back_to_update() {
        let phases = seq(&[(I, 1), (N, 4)]);
        let report = detect_loops_in_phases(&phases, &with_threshold(3)).unwrap();
        let v = report.violation().unwrap();
        assert_eq!(v.phase, Phase::NestedUpdate);
        assert_eq!(v.threshold, 3);
    }

    #[test]
    fn test_nested_threshold_override() {
        let opts = LoopOptions {
            max_consecutive_update: 10,
            max_consecutive_nested_update: Some(2),
            ..Default::default()
        };
        let phases = seq(&[(U, 5), (N, 3)]);
        let v = detect_loops_in_phases(&phases, &opts).unwrap().violation().cloned().unwrap();
        assert_eq!(v.phase, Phase::NestedUpdate);
        assert_eq!((v.start_pos, v.end_pos), (6, 8));
        assert_eq!(v.max_runs_observed.update, 5);
        assert_eq!(v.max_runs_observed.nested_update, 3);
    }

    #[test]
    fn test_ignore_budget_is_global() {
        // Budget of 6 eats the first run (5) and one event of the second run
        let phases = seq(&[(I, 1), (U, 5), (I, 1), (U, 8)]);
        let opts = LoopOptions {
            max_consecutive_update: 3,
            ignore_initial_count: 6,
            ..Default::default()
        };
        let v = detect_loops_in_phases(&phases, &opts).unwrap().violation().cloned().unwrap();
        assert_eq!(v.run_length, 4);
        assert_eq!(v.start_pos, 9);
        assert_eq!(v.end_pos, 12);
    }

    #[test]
    fn test_ignore_budget_skips_early_churn() {
        let phases = seq(&[(I, 1), (U, 12)]);
        let opts = LoopOptions {
            ignore_initial_count: 2,
            ..Default::default()
        };
        let report = detect_loops_in_phases(&phases, &opts).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.max_runs_observed().update, 10);
    }

    #[test]
    fn test_other_phase_ends_run() {
        let phases = seq(&[(U, 3), (N, 1), (U, 3)]);
        let opts = LoopOptions {
            max_consecutive_update: 5,
            ..Default::default()
        };
        assert!(detect_loops_in_phases(&phases, &opts).unwrap().is_clean());
    }

    #[test]
    fn test_run_ending_at_last_event_counts() {
        let phases = seq(&[(I, 1), (U, 2), (I, 1), (U, 7)]);
        let report = detect_loops_in_phases(&phases, &LoopOptions::default()).unwrap();
        assert_eq!(report.max_runs_observed().update, 7);
    }

    #[test]
    fn test_empty_history_is_clean() {
        let report = detect_loops(&[], &LoopOptions::default()).unwrap();
        assert_eq!(
            report,
            LoopReport::Clean {
                max_runs_observed: MaxRuns::default(),
                events_scanned: 0,
            }
        );
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let result = detect_loops_in_phases(&[U], &with_threshold(0));
        assert!(matches!(result, Err(DetectError::InvalidArgument(_))));
    }

    #[test]
    fn test_full_history_and_label_included() {
        let opts = LoopOptions {
            max_consecutive_update: 1,
            component_label: Some("Counter".to_string()),
            show_full_history: true,
            ..Default::default()
        };
        let phases = seq(&[(I, 1), (U, 2), (I, 1)]);
        let v = detect_loops_in_phases(&phases, &opts).unwrap().violation().cloned().unwrap();
        assert_eq!(v.component_label.as_deref(), Some("Counter"));
        assert_eq!(v.history, Some(phases));
    }

    fn phase_strategy() -> impl Strategy<Value = Phase> {
        prop_oneof![Just(I), Just(U), Just(N)]
    }

    proptest! {
        #[test]
        fn prop_clean_report_max_runs_within_thresholds(
            phases in prop::collection::vec(phase_strategy(), 0..80),
            max in 1usize..8,
        ) {
            let report = detect_loops_in_phases(&phases, &with_threshold(max)).unwrap();
            let runs = report.max_runs_observed();
            if report.is_clean() {
                prop_assert!(runs.update <= max);
                prop_assert!(runs.nested_update <= max);
            }
        }

        #[test]
        fn prop_violation_positions_cover_one_phase(
            phases in prop::collection::vec(phase_strategy(), 0..80),
            max in 1usize..5,
        ) {
            let report = detect_loops_in_phases(&phases, &with_threshold(max)).unwrap();
            if let Some(v) = report.violation() {
                prop_assert_eq!(v.run_length, max + 1);
                prop_assert_eq!(v.end_pos - v.start_pos + 1, v.run_length);
                for pos in v.positions() {
                    prop_assert_eq!(phases[pos - 1], v.phase);
                }
            }
        }

        #[test]
        fn prop_max_run_matches_naive_count(
            phases in prop::collection::vec(phase_strategy(), 0..60),
        ) {
            let report = detect_loops_in_phases(&phases, &with_threshold(usize::MAX)).unwrap();
            let mut naive = MaxRuns::default();
            let mut i = 0;
            while i < phases.len() {
                let mut j = i;
                while j < phases.len() && phases[j] == phases[i] {
                    j += 1;
                }
                naive.observe(phases[i], j - i);
                i = j;
            }
            prop_assert_eq!(report.max_runs_observed(), naive);
        }
    }
}
