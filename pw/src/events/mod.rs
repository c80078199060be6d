//! Phase events, their per-instance log, and synchronous dispatch
//!
//! Every observed lifecycle transition of a monitored instance becomes a
//! [`PhaseEvent`] appended to that instance's [`EventLog`]. The append is
//! followed, before `record` returns, by a fan-out on the instance's
//! [`EventBus`].
//!
//! # Architecture
//!
//! ```text
//!   producer
//!      │ Monitor::record(phase)
//!      ▼
//! ┌─────────────────────────────┐
//! │           EVENT LOG          │  append-only, seq 1..N
//! │  history │ by_phase │ aggs   │  caches keyed by version
//! └─────────────────────────────┘
//!      │ PhaseNotification { count, phase, history }
//!      ▼
//! ┌─────────────────────────────┐
//! │           EVENT BUS          │  FIFO, de-duplicated listeners
//! └─────────────────────────────┘
//!      │               │               │
//!      ▼               ▼               ▼
//! ┌───────────┐  ┌───────────┐  ┌───────────┐
//! │  Waiters  │  │ Recorder  │  │  Custom   │
//! │ (futures) │  │  .jsonl   │  │ listeners │
//! └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use phasewatch::events::{listener, Phase};
//! use phasewatch::monitor::Monitor;
//!
//! let monitor = Monitor::new(Some("Counter".into()));
//! let sub = monitor.subscribe(listener(|n| {
//!     println!("#{} {}", n.count, n.phase);
//!     Ok(())
//! }));
//!
//! monitor.record(Phase::Initial)?;
//! monitor.record(Phase::Update)?;
//! sub.unsubscribe();
//! ```

mod bus;
mod log;
mod recorder;
mod types;

pub use bus::{BusError, EventBus, Listener, ListenerResult, Subscription, listener};
pub use log::{EventLog, PhaseCounts};
pub use recorder::{HISTORY_FILE, HistoryRecorder, default_runs_dir, read_history, read_instance_history};
pub use types::{HistoryEntry, Phase, PhaseEvent, PhaseNotification};
