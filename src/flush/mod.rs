//! Flush machinery - moving queued entries to the collector.
//!
//! Two layers:
//! 1. **FlushService**: one delivery attempt (snapshot, optimize, send,
//!    requeue on failure), with a single-attempt-in-flight guard
//! 2. **FlushScheduler**: background task firing attempts on the timer and
//!    size triggers, plus the bounded shutdown flush

pub mod scheduler;
pub mod service;

pub use scheduler::{FlushScheduler, SchedulerConfig};
pub use service::{FlushOutcome, FlushService, FlushStats, SkipReason};
