//! Monitored instances
//!
//! A [`Monitor`] pairs one [`EventLog`](crate::events::EventLog) with one
//! [`EventBus`](crate::events::EventBus) and is the producer-facing entry
//! point: `record(phase)` appends and then notifies listeners synchronously.
//!
//! Instances are isolated from each other. The only shared objects are the
//! optional [`Registry`], which maps identity tokens to live monitors without
//! owning them, and the [`LifecycleManager`], which bulk-resets tracked
//! handles between usage cycles.

mod instance;
mod lifecycle;
mod registry;

pub use instance::{InstanceId, Monitor};
pub use lifecycle::{LifecycleManager, Resettable};
pub use registry::Registry;
