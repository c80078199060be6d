//! Async condition waits
//!
//! A [`Waiter`] turns "the log will eventually satisfy X" into a future that
//! settles exactly once:
//!
//! ```text
//!              ┌──────────── condition holds at creation ───────────┐
//!              │                                                     ▼
//!  create ──► Pending ──► listener match ──────────────────────► Resolved
//!              │    └───► exact target passed ─────────────────► ExceededEarly
//!              └───────► deadline ─────────────────────────────► Timeout
//! ```
//!
//! Negated waits ([`Waiter::wait_for_absence`]) swap polarity: the deadline
//! resolves them and observing the condition rejects them.
//!
//! # Usage
//!
//! ```rust,ignore
//! let monitor = Arc::new(Monitor::new(Some("Counter".into())));
//! let done = monitor.waiter().wait_for_count(3, WaitOptions::from_millis(500.0)?);
//! // ... producer records phases ...
//! let outcome = done.await?;
//! ```

mod condition;
mod error;
mod waiter;

pub use condition::{Condition, DEFAULT_TIMEOUT_MS, WaitOptions};
pub use error::{WaitError, WaitSnapshot};
pub use waiter::{WaitOutcome, WaitResult, Waiter};
