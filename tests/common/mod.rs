//! Shared test transports and helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use beacon::error::TransportError;
use beacon::storage::MemoryStore;
use beacon::{Pipeline, PipelineConfig, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Scripted transport: pops one result per delivery (default success) and
/// records every batch it was handed, including failed ones.
#[derive(Default)]
pub struct RecordingTransport {
    script: Mutex<VecDeque<bool>>,
    attempts: Mutex<Vec<Vec<Value>>>,
    accepted: Mutex<Vec<Vec<Value>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Upcoming results, `false` meaning failure.
    pub fn scripted(results: &[bool]) -> Arc<Self> {
        let transport = Self::default();
        transport.script.lock().extend(results.iter().copied());
        Arc::new(transport)
    }

    pub fn push_results(&self, results: &[bool]) {
        self.script.lock().extend(results.iter().copied());
    }

    /// Batches that were accepted, in delivery order.
    pub fn accepted(&self) -> Vec<Vec<Value>> {
        self.accepted.lock().clone()
    }

    /// Every entry ever accepted, flattened in delivery order.
    pub fn accepted_entries(&self) -> Vec<Value> {
        self.accepted.lock().iter().flatten().cloned().collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, batch: &[Value]) -> Result<(), TransportError> {
        self.attempts.lock().push(batch.to_vec());
        let ok = self.script.lock().pop_front().unwrap_or(true);
        if ok {
            self.accepted.lock().push(batch.to_vec());
            Ok(())
        } else {
            Err(TransportError::Status {
                status: 503,
                body: "collector unavailable".to_string(),
            })
        }
    }
}

/// Transport that parks every delivery until released.
#[derive(Default)]
pub struct GatedTransport {
    pub entered: Notify,
    pub release: Notify,
    accepted: Mutex<Vec<Vec<Value>>>,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accepted(&self) -> Vec<Vec<Value>> {
        self.accepted.lock().clone()
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn deliver(&self, batch: &[Value]) -> Result<(), TransportError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.accepted.lock().push(batch.to_vec());
        Ok(())
    }
}

/// Config that never fires the timer during a test.
pub fn quiet_config() -> PipelineConfig {
    PipelineConfig {
        flush_interval: Duration::from_secs(3600),
        shutdown_grace: Duration::from_millis(500),
        ..PipelineConfig::default()
    }
}

pub fn pipeline_with(
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
) -> (Pipeline, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(config, store.clone(), transport).unwrap();
    (pipeline, store)
}

/// Values of `field` across entries.
pub fn field_values(entries: &[Value], field: &str) -> Vec<Value> {
    entries.iter().map(|e| e[field].clone()).collect()
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
