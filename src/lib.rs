//! # Beacon - interaction telemetry pipeline
//!
//! Records dashboard interactions (button clicks, AI toggles, sentence
//! edits, analysis outcomes), reduces them to a compact differential wire
//! form, buffers them in order and delivers them in batches to a remote
//! collector.
//!
//! Delivery is best-effort and at-least-once:
//! - entries leave the queue only after a confirmed delivery of exactly the
//!   batch they were part of
//! - failed batches go back to the head of the queue, ahead of anything
//!   recorded while the attempt was outstanding
//! - the shutdown flush is bounded and may not land

pub mod config;
pub mod error;
pub mod flush;
pub mod pipeline;
pub mod storage;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use config::{PipelineConfig, RetryPolicy};
pub use error::{StoreError, TelemetryError, TransportError};
pub use flush::{FlushOutcome, FlushScheduler, FlushService, SkipReason};
pub use pipeline::{ApiOutcome, Pipeline};
pub use storage::{CounterState, FileStore, IdentityStore, MemoryStore, SqliteStore, StateStore};
pub use telemetry::{
    BatchOptimizer, DifferentialTracker, EventFilter, EventQueue, FilterConfig,
    TelemetryRecorder, TelemetryStats,
};
pub use transport::{HttpTransport, Transport};
pub use types::{EventType, LogEntry, Session};
