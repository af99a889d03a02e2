//! Delivery of batches to the remote collector.
//!
//! A batch is a JSON array of entries in queue order. Entries that cannot be
//! serialized are dropped one by one in [`encode_batch`] so a single bad
//! entry never blocks the rest of its batch.

pub mod http;

pub use http::HttpTransport;

use crate::error::TransportError;
use crate::types::LogEntry;
use async_trait::async_trait;
use log::warn;
use serde_json::Value;

/// Collector delivery contract.
///
/// Any error means the batch was not accepted and will be retried.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one ordered batch.
    async fn deliver(&self, batch: &[Value]) -> Result<(), TransportError>;
}

/// Serialize entries in order, dropping those that fail.
///
/// Returns the encoded entries and the number dropped.
pub fn encode_batch(entries: &[LogEntry]) -> (Vec<Value>, usize) {
    let mut encoded = Vec::with_capacity(entries.len());
    let mut dropped = 0;

    for entry in entries {
        match serde_json::to_value(entry) {
            Ok(value) => encoded.push(value),
            Err(e) => {
                warn!(
                    "Dropping '{}' entry from {} that failed to serialize: {}",
                    entry.event_type, entry.timestamp, e
                );
                dropped += 1;
            }
        }
    }

    (encoded, dropped)
}
