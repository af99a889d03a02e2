//! # Telemetry Module - interaction capture for the dashboard
//!
//! Turns UI actions into compact log entries:
//! - Event filtering (redaction, delta thresholds, error categories)
//! - Differential encoding of counters and the AI flag
//! - Ordered queueing with a size trigger
//! - Collapsing of noisy repeated events before transmission

pub mod differential;
pub mod filter;
pub mod optimizer;
pub mod queue;
pub mod recorder;

pub use differential::{DifferentialTracker, FieldValue};
pub use filter::{EventFilter, FilterConfig};
pub use optimizer::BatchOptimizer;
pub use queue::EventQueue;
pub use recorder::{TelemetryRecorder, TelemetryStats};
