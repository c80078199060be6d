//! Waiter - timeout-bounded condition waits over a monitor
//!
//! Every wait is created synchronously and settles exactly once:
//! - If the condition already holds (or an exact target is already passed) the
//!   wait settles at creation, with no listener and no timer
//! - Otherwise a bus listener and a deadline are armed together; whichever
//!   fires first settles the wait and the other is released
//!
//! Dropping a pending wait future cancels it: its guard unsubscribes the
//! listener and the timer is dropped with the future.

use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{PhaseNotification, Subscription, listener};
use crate::monitor::Monitor;

use super::condition::{Condition, Evaluation, Predicate, WaitOptions};
use super::error::{WaitError, WaitSnapshot};

/// Result of a wait
pub type WaitResult = Result<WaitOutcome, WaitError>;

/// A successful settlement
#[derive(Clone, Debug)]
pub struct WaitOutcome {
    pub condition: Condition,
    /// State at settlement
    pub observed: WaitSnapshot,
    /// Time from creation to settlement
    pub elapsed: Duration,
    /// Settled at creation without arming a listener or timer
    pub immediate: bool,
}

/// What the listener saw when it settled the wait
struct Observation {
    /// An exact target was passed rather than hit
    exceeded: bool,
    snapshot: WaitSnapshot,
}

/// Deadline cap for timeouts that overflow `Instant`, about 30 years
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

type SettleSlot = Arc<Mutex<Option<oneshot::Sender<Observation>>>>;

/// Take the single settlement slot; only the first caller gets the sender
fn claim_settlement(slot: &SettleSlot, observation: Observation) -> bool {
    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(_) => {
            warn!("Waiter: settlement slot poisoned");
            None
        }
    };
    match sender {
        Some(tx) => {
            // Receiver gone means the wait was dropped or already timed out
            let _ = tx.send(observation);
            true
        }
        None => false,
    }
}

/// A wait with a live listener and a deadline
struct Armed {
    rx: oneshot::Receiver<Observation>,
    subscription: Subscription,
    monitor: Arc<Monitor>,
    condition: Condition,
    predicate: Predicate,
    negated: bool,
    started: Instant,
    deadline: Instant,
    timeout: Duration,
}

impl Drop for Armed {
    fn drop(&mut self) {
        // Idempotent: may already be released by the listener itself
        self.subscription.unsubscribe();
    }
}

enum WaitState {
    Settled(WaitResult),
    Armed(Armed),
}

impl Armed {
    async fn settle(mut self) -> WaitResult {
        let received = tokio::time::timeout_at(self.deadline, &mut self.rx).await;
        self.subscription.unsubscribe();
        let elapsed = self.started.elapsed();

        match received {
            Ok(Ok(observation)) => {
                debug!(condition = %self.condition, count = observation.snapshot.count, "Waiter: listener settled wait");
                finish(
                    self.condition,
                    self.predicate,
                    self.negated,
                    observation.exceeded,
                    observation.snapshot,
                    elapsed,
                    false,
                )
            }
            Ok(Err(_)) => {
                info!(condition = %self.condition, "Waiter: listener dropped, instance was reset");
                Err(WaitError::Detached {
                    condition: self.condition,
                    observed: WaitSnapshot::from_history(self.monitor.history()),
                })
            }
            Err(_) => {
                let observed = WaitSnapshot::from_history(self.monitor.history());
                debug!(condition = %self.condition, count = observed.count, negated = self.negated, "Waiter: deadline reached");
                if self.negated {
                    Ok(WaitOutcome {
                        condition: self.condition,
                        observed,
                        elapsed,
                        immediate: false,
                    })
                } else {
                    Err(WaitError::Timeout {
                        condition: self.condition,
                        timeout: self.timeout,
                        observed,
                    })
                }
            }
        }
    }
}

/// Map an evaluation to the terminal result, honoring polarity
fn finish(
    condition: Condition,
    predicate: Predicate,
    negated: bool,
    exceeded: bool,
    observed: WaitSnapshot,
    elapsed: Duration,
    immediate: bool,
) -> WaitResult {
    let outcome = |observed| {
        Ok(WaitOutcome {
            condition,
            observed,
            elapsed,
            immediate,
        })
    };
    match (exceeded, negated) {
        (false, false) => outcome(observed),
        (true, false) => Err(WaitError::ExceededEarly {
            condition,
            target: predicate.exact_target().unwrap_or_default(),
            observed,
        }),
        (false, true) => Err(WaitError::Observed { condition, observed }),
        // The exact target can no longer be hit, so its absence is proven
        (true, true) => outcome(observed),
    }
}

/// Creates condition waits against one monitor
#[derive(Clone, Debug)]
pub struct Waiter {
    monitor: Arc<Monitor>,
}

impl Waiter {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        debug!(id = %monitor.id(), "Waiter::new: called");
        Self { monitor }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Wait until `condition` holds
    ///
    /// The condition is checked and the listener armed when this is called,
    /// not when the future is first polled.
    pub fn wait(&self, condition: Condition, options: WaitOptions) -> impl Future<Output = WaitResult> + Send + 'static {
        let state = self.arm(condition, options, false);
        async move {
            match state {
                WaitState::Settled(result) => result,
                WaitState::Armed(armed) => armed.settle().await,
            }
        }
    }

    /// Wait for the timeout and succeed only if `condition` never holds
    pub fn wait_for_absence(
        &self,
        condition: Condition,
        options: WaitOptions,
    ) -> impl Future<Output = WaitResult> + Send + 'static {
        let state = self.arm(condition, options, true);
        async move {
            match state {
                WaitState::Settled(result) => result,
                WaitState::Armed(armed) => armed.settle().await,
            }
        }
    }

    /// Wait for exactly `count` total events
    pub fn wait_for_count(&self, count: usize, options: WaitOptions) -> impl Future<Output = WaitResult> + Send + 'static {
        self.wait(Condition::ExactCount(count), options)
    }

    /// Wait for at least `count` total events
    pub fn wait_for_min_count(
        &self,
        count: usize,
        options: WaitOptions,
    ) -> impl Future<Output = WaitResult> + Send + 'static {
        self.wait(Condition::MinCount(count), options)
    }

    /// Wait until the most recent event has `phase`
    pub fn wait_for_phase(
        &self,
        phase: crate::events::Phase,
        options: WaitOptions,
    ) -> impl Future<Output = WaitResult> + Send + 'static {
        self.wait(Condition::PhaseReached(phase), options)
    }

    /// Wait for exactly `delta` events after the stored baseline
    pub fn wait_for_rerenders(
        &self,
        delta: usize,
        options: WaitOptions,
    ) -> impl Future<Output = WaitResult> + Send + 'static {
        self.wait(Condition::Rerenders(delta), options)
    }

    fn arm(&self, condition: Condition, options: WaitOptions, negated: bool) -> WaitState {
        let started = Instant::now();
        let predicate = Predicate::resolve(condition, self.monitor.baseline());
        debug!(
            id = %self.monitor.id(),
            %condition,
            ?predicate,
            negated,
            timeout = ?options.timeout(),
            "Waiter::arm: called"
        );

        // Race protection: settle now if the answer is already known
        let evaluation = predicate.evaluate(self.monitor.count(), self.monitor.latest_phase());
        if evaluation != Evaluation::Pending {
            debug!(%condition, ?evaluation, "Waiter::arm: settled at creation");
            let observed = WaitSnapshot::from_history(self.monitor.history());
            return WaitState::Settled(finish(
                condition,
                predicate,
                negated,
                evaluation == Evaluation::Exceeded,
                observed,
                Duration::ZERO,
                true,
            ));
        }

        let (tx, rx) = oneshot::channel();
        let slot: SettleSlot = Arc::new(Mutex::new(Some(tx)));
        let own_subscription: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        let subscription = {
            let slot = Arc::clone(&slot);
            let own_subscription = Arc::clone(&own_subscription);
            self.monitor.subscribe(listener(move |n: &PhaseNotification| {
                let evaluation = predicate.evaluate(n.count, Some(n.phase));
                let settles = match evaluation {
                    Evaluation::Pending => false,
                    Evaluation::Satisfied => true,
                    // Negated waits only react to the positive condition
                    Evaluation::Exceeded => !negated,
                };
                if settles
                    && claim_settlement(
                        &slot,
                        Observation {
                            exceeded: evaluation == Evaluation::Exceeded,
                            snapshot: WaitSnapshot::from_history(Arc::clone(&n.history)),
                        },
                    )
                    && let Some(sub) = own_subscription.get()
                {
                    sub.unsubscribe();
                }
                Ok(())
            }))
        };
        let _ = own_subscription.set(subscription.clone());

        // Appends from another thread may land between the check and subscribe
        let evaluation = predicate.evaluate(self.monitor.count(), self.monitor.latest_phase());
        if (evaluation == Evaluation::Satisfied || (evaluation == Evaluation::Exceeded && !negated))
            && claim_settlement(
                &slot,
                Observation {
                    exceeded: evaluation == Evaluation::Exceeded,
                    snapshot: WaitSnapshot::from_history(self.monitor.history()),
                },
            )
        {
            subscription.unsubscribe();
        }

        WaitState::Armed(Armed {
            rx,
            subscription,
            monitor: Arc::clone(&self.monitor),
            condition,
            predicate,
            negated,
            started,
            deadline: started
                .checked_add(options.timeout())
                .unwrap_or_else(|| started + FAR_FUTURE),
            timeout: options.timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Phase;
    use futures::FutureExt;

    fn opts(ms: u64) -> WaitOptions {
        WaitOptions::new(Duration::from_millis(ms)).unwrap()
    }

    fn monitor_with(phases: &[Phase]) -> Arc<Monitor> {
        let monitor = Arc::new(Monitor::new(Some("Test".to_string())));
        for phase in phases {
            monitor.record(*phase).unwrap();
        }
        monitor
    }

    #[tokio::test]
    async fn test_empty_log_exact_zero_resolves_immediately() {
        let monitor = monitor_with(&[]);
        let outcome = monitor.waiter().wait_for_count(0, opts(1)).now_or_never().unwrap().unwrap();
        assert!(outcome.immediate);
        assert_eq!(outcome.observed.count, 0);
        assert!(!monitor.bus().has_listeners());
    }

    #[tokio::test]
    async fn test_already_satisfied_has_no_subscription() {
        let monitor = monitor_with(&[Phase::Initial, Phase::Update]);
        let fut = monitor.waiter().wait_for_count(2, opts(1000));
        assert!(!monitor.bus().has_listeners());

        // Later events must not disturb the settled wait
        monitor.record(Phase::Update).unwrap();
        let outcome = fut.now_or_never().unwrap().unwrap();
        assert!(outcome.immediate);
        assert_eq!(outcome.observed.count, 2);
    }

    #[tokio::test]
    async fn test_overshoot_at_creation_rejects_immediately() {
        let monitor = monitor_with(&[Phase::Initial, Phase::Update, Phase::Update]);
        let err = monitor
            .waiter()
            .wait_for_count(2, opts(60_000))
            .now_or_never()
            .expect("must not wait for the timeout")
            .unwrap_err();
        match err {
            WaitError::ExceededEarly { target, observed, .. } => {
                assert_eq!(target, 2);
                assert_eq!(observed.count, 3);
            }
            other => panic!("Expected ExceededEarly, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_when_listener_matches() {
        let monitor = monitor_with(&[Phase::Initial]);
        let fut = monitor.waiter().wait_for_count(3, opts(1000));
        assert_eq!(monitor.bus().listener_count(), 1);

        monitor.record(Phase::Update).unwrap();
        monitor.record(Phase::Update).unwrap();
        // Listener released itself on match
        assert!(!monitor.bus().has_listeners());

        let outcome = fut.await.unwrap();
        assert!(!outcome.immediate);
        assert_eq!(outcome.observed.count, 3);
        assert_eq!(outcome.observed.phase, Some(Phase::Update));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_observed_state() {
        let monitor = monitor_with(&[Phase::Initial]);
        let err = monitor.waiter().wait_for_count(5, opts(200)).await.unwrap_err();
        assert!(err.is_timeout());
        let observed = err.observed().unwrap();
        assert_eq!(observed.count, 1);
        assert_eq!(observed.phases(), vec![Phase::Initial]);
        assert!(!monitor.bus().has_listeners());
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_count_and_phase_waits() {
        let monitor = monitor_with(&[Phase::Initial]);
        let waiter = monitor.waiter();
        let min = waiter.wait_for_min_count(2, opts(1000));
        let nested = waiter.wait_for_phase(Phase::NestedUpdate, opts(1000));
        assert_eq!(monitor.bus().listener_count(), 2);

        monitor.record(Phase::Update).unwrap();
        monitor.record(Phase::NestedUpdate).unwrap();

        assert_eq!(min.await.unwrap().observed.count, 2);
        assert_eq!(nested.await.unwrap().observed.phase, Some(Phase::NestedUpdate));
        assert!(!monitor.bus().has_listeners());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerenders_since_baseline() {
        let monitor = monitor_with(&[Phase::Initial, Phase::Update]);
        monitor.mark_baseline();
        let fut = monitor.waiter().wait_for_rerenders(1, opts(1000));
        monitor.record(Phase::Update).unwrap();
        let outcome = fut.await.unwrap();
        assert_eq!(outcome.observed.count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerenders_overshoot_after_baseline() {
        let monitor = monitor_with(&[Phase::Initial]);
        monitor.mark_baseline();
        monitor.record(Phase::Update).unwrap();
        monitor.record(Phase::Update).unwrap();
        let err = monitor.waiter().wait_for_rerenders(1, opts(1000)).await.unwrap_err();
        assert!(err.is_exceeded_early());
    }

    #[tokio::test(start_paused = true)]
    async fn test_negated_wait_resolves_on_timeout() {
        let monitor = monitor_with(&[Phase::Initial]);
        let outcome = monitor
            .waiter()
            .wait_for_absence(Condition::PhaseReached(Phase::NestedUpdate), opts(100))
            .await
            .unwrap();
        assert!(!outcome.immediate);
        assert!(outcome.elapsed >= Duration::from_millis(100));
        assert!(!monitor.bus().has_listeners());
    }

    #[tokio::test(start_paused = true)]
    async fn test_negated_wait_rejects_on_observation() {
        let monitor = monitor_with(&[Phase::Initial]);
        let fut = monitor
            .waiter()
            .wait_for_absence(Condition::MinCount(2), opts(60_000));
        monitor.record(Phase::Update).unwrap();
        let err = fut.now_or_never().expect("must reject without waiting").unwrap_err();
        match err {
            WaitError::Observed { observed, .. } => assert_eq!(observed.count, 2),
            other => panic!("Expected Observed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_negated_wait_already_observed() {
        let monitor = monitor_with(&[Phase::Initial, Phase::Update]);
        let err = monitor
            .waiter()
            .wait_for_absence(Condition::PhaseReached(Phase::Update), opts(1000))
            .now_or_never()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WaitError::Observed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waits_settle_independently() {
        let monitor = monitor_with(&[Phase::Initial]);
        let waiter = monitor.waiter();
        let two = waiter.wait_for_count(2, opts(1000));
        let three = waiter.wait_for_count(3, opts(500));
        let four = waiter.wait_for_count(4, opts(300));

        monitor.record(Phase::Update).unwrap();
        monitor.record(Phase::Update).unwrap();

        assert_eq!(two.await.unwrap().observed.count, 2);
        assert_eq!(three.await.unwrap().observed.count, 3);
        assert!(four.await.unwrap_err().is_timeout());
        assert!(!monitor.bus().has_listeners());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_pending_wait_releases_listener() {
        let monitor = monitor_with(&[Phase::Initial]);
        let fut = monitor.waiter().wait_for_count(10, opts(1000));
        assert!(monitor.bus().has_listeners());
        drop(fut);
        assert!(!monitor.bus().has_listeners());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_stays_pending_until_dropped() {
        let monitor = monitor_with(&[Phase::Initial]);
        let mut fut = Box::pin(
            monitor
                .waiter()
                .wait_for_count(5, WaitOptions::new(Duration::MAX).unwrap()),
        );
        assert!((&mut fut).now_or_never().is_none());
        assert!(monitor.bus().has_listeners());

        drop(fut);
        assert!(!monitor.bus().has_listeners());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_still_resolves_on_match() {
        let monitor = monitor_with(&[Phase::Initial]);
        let fut = monitor
            .waiter()
            .wait_for_min_count(2, WaitOptions::new(Duration::MAX).unwrap());
        monitor.record(Phase::Update).unwrap();
        assert_eq!(fut.await.unwrap().observed.count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_detaches_pending_wait() {
        let monitor = monitor_with(&[Phase::Initial]);
        let fut = monitor.waiter().wait_for_count(5, opts(1000));
        monitor.reset();
        let err = fut.await.unwrap_err();
        assert!(matches!(err, WaitError::Detached { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_once_despite_further_events() {
        let monitor = monitor_with(&[Phase::Initial]);
        let fut = monitor.waiter().wait_for_count(2, opts(1000));
        monitor.record(Phase::Update).unwrap();
        monitor.record(Phase::Update).unwrap();
        monitor.record(Phase::Update).unwrap();
        let outcome = fut.await.unwrap();
        assert_eq!(outcome.observed.count, 2);
    }
}
