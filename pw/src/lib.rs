//! phasewatch - lifecycle phase instrumentation for monitored components
//!
//! phasewatch records the discrete lifecycle phases a monitored component goes
//! through (initial mount, update, nested update), serves cached views over
//! that history, notifies listeners synchronously on every record, lets async
//! code wait for conditions on the history, and flags runaway update loops.
//!
//! # Core Concepts
//!
//! - **One monitor per instance**: each [`Monitor`] owns an isolated log and bus
//! - **Synchronous delivery**: listeners run before `record` returns
//! - **Race-free waits**: conditions are checked when a wait is created, not
//!   only on later events
//! - **Structured results**: loop detection returns data, not formatted text
//!
//! # Modules
//!
//! - [`events`] - Phase types, the event log, the bus, and JSONL recordings
//! - [`monitor`] - Monitored instances, the registry, bulk reset
//! - [`wait`] - Timeout-bounded condition waits
//! - [`detect`] - Loop detection over a history
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod detect;
pub mod events;
pub mod monitor;
pub mod wait;

// Re-export commonly used types
pub use config::Config;
pub use detect::{DetectError, LoopOptions, LoopReport, LoopViolation, MaxRuns, detect_loops};
pub use events::{
    BusError, EventBus, EventLog, HistoryRecorder, Listener, Phase, PhaseEvent, PhaseNotification, Subscription,
    listener, read_history,
};
pub use monitor::{InstanceId, LifecycleManager, Monitor, Registry, Resettable};
pub use wait::{Condition, WaitError, WaitOptions, WaitOutcome, WaitResult, Waiter};
