//! Error types.
//!
//! Only construction paths return `TelemetryError` to callers. Store and
//! transport errors are absorbed by the pipeline and turned into log lines
//! and flush outcomes.

use thiserror::Error;

/// Failure reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("state store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Failure delivering a batch to the collector.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("collector request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collector responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("collector response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("batch could not be encoded: {0}")]
    Encode(String),
}

/// Crate-level construction error.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
