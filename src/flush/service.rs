//! One delivery attempt: snapshot, optimize, send, settle.
//!
//! Only one attempt may be in flight. The snapshot taken from the queue is
//! held by an [`InFlightBatch`] guard; unless the attempt confirms delivery
//! the guard puts the exact pre-optimization snapshot back at the queue
//! head, also when the attempt future is dropped mid-flight.

use crate::config::RetryPolicy;
use crate::telemetry::{BatchOptimizer, EventQueue};
use crate::transport::{encode_batch, Transport};
use crate::types::{now_ms, LogEntry};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Why a trigger did not result in a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing queued
    Empty,
    /// Another attempt is outstanding
    InFlight,
    /// Waiting out the retry backoff
    BackingOff,
}

/// Result of a flush trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// The snapshot was confirmed and removed from the queue
    Delivered {
        sent: usize,
        collapsed: usize,
        dropped: usize,
    },
    /// The snapshot went back to the queue head
    Failed { requeued: usize, error: String },
    Skipped(SkipReason),
}

impl FlushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, FlushOutcome::Delivered { .. })
    }
}

/// Delivery counters
#[derive(Debug, Default)]
struct FlushCounters {
    delivered: AtomicU64,
    successful_attempts: AtomicU64,
    failed_attempts: AtomicU64,
    collapsed: AtomicU64,
    dropped_malformed: AtomicU64,
}

/// Snapshot of [`FlushService`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub delivered: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub collapsed: u64,
    pub dropped_malformed: u64,
}

/// Performs flush attempts against a transport.
pub struct FlushService {
    queue: Arc<EventQueue>,
    optimizer: BatchOptimizer,
    transport: Arc<dyn Transport>,
    retry: Option<RetryPolicy>,
    in_flight: AtomicBool,
    consecutive_failures: AtomicU32,
    /// Earliest instant a backoff-honoring attempt may start
    not_before: Mutex<Option<Instant>>,
    /// Timestamp (ms) of the last attempt start
    last_attempt_at: RwLock<Option<u64>>,
    /// Monotonic start of the last attempt, for interval bookkeeping
    last_attempt_started: Mutex<Option<Instant>>,
    counters: FlushCounters,
}

impl FlushService {
    pub fn new(
        queue: Arc<EventQueue>,
        optimizer: BatchOptimizer,
        transport: Arc<dyn Transport>,
        retry: Option<RetryPolicy>,
    ) -> Self {
        Self {
            queue,
            optimizer,
            transport,
            retry,
            in_flight: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            not_before: Mutex::new(None),
            last_attempt_at: RwLock::new(None),
            last_attempt_started: Mutex::new(None),
            counters: FlushCounters::default(),
        }
    }

    /// Attempt delivery of everything queued, honoring retry backoff.
    pub async fn flush(&self) -> FlushOutcome {
        self.attempt(true).await
    }

    /// Attempt delivery ignoring backoff (shutdown path).
    pub async fn flush_now(&self) -> FlushOutcome {
        self.attempt(false).await
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Milliseconds since epoch of the last attempt, if any.
    pub fn last_attempt_at(&self) -> Option<u64> {
        *self.last_attempt_at.read()
    }

    /// Monotonic start of the last non-empty attempt, whoever triggered it.
    pub fn last_attempt_started(&self) -> Option<Instant> {
        *self.last_attempt_started.lock()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> FlushStats {
        FlushStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            successful_attempts: self.counters.successful_attempts.load(Ordering::Relaxed),
            failed_attempts: self.counters.failed_attempts.load(Ordering::Relaxed),
            collapsed: self.counters.collapsed.load(Ordering::Relaxed),
            dropped_malformed: self.counters.dropped_malformed.load(Ordering::Relaxed),
        }
    }

    async fn attempt(&self, honor_backoff: bool) -> FlushOutcome {
        if honor_backoff {
            if let Some(deadline) = *self.not_before.lock() {
                if Instant::now() < deadline {
                    return FlushOutcome::Skipped(SkipReason::BackingOff);
                }
            }
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush trigger ignored, an attempt is already in flight");
            return FlushOutcome::Skipped(SkipReason::InFlight);
        }
        let _in_flight = InFlightFlag(&self.in_flight);

        let snapshot = self.queue.take_all();
        if snapshot.is_empty() {
            return FlushOutcome::Skipped(SkipReason::Empty);
        }
        *self.last_attempt_at.write() = Some(now_ms());
        *self.last_attempt_started.lock() = Some(Instant::now());

        let mut batch = InFlightBatch::new(&self.queue, snapshot);
        let optimized = self.optimizer.optimize(batch.entries());
        let collapsed = batch.entries().len() - optimized.len();
        let (payload, dropped) = encode_batch(&optimized);

        let result = if payload.is_empty() {
            Ok(())
        } else {
            self.transport.deliver(&payload).await
        };

        match result {
            Ok(()) => {
                let total = batch.confirm();
                self.counters.delivered.fetch_add(payload.len() as u64, Ordering::Relaxed);
                self.counters.successful_attempts.fetch_add(1, Ordering::Relaxed);
                self.counters.collapsed.fetch_add(collapsed as u64, Ordering::Relaxed);
                self.counters.dropped_malformed.fetch_add(dropped as u64, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                *self.not_before.lock() = None;

                info!(
                    "Delivered {} of {} queued entries ({} collapsed, {} dropped)",
                    payload.len(),
                    total,
                    collapsed,
                    dropped
                );
                FlushOutcome::Delivered {
                    sent: payload.len(),
                    collapsed,
                    dropped,
                }
            }
            Err(e) => {
                let requeued = batch.entries().len();
                drop(batch);
                self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

                if let Some(policy) = &self.retry {
                    let delay = policy.delay_for(failures);
                    *self.not_before.lock() = Some(Instant::now() + delay);
                    warn!(
                        "Delivery failed ({} in a row), {} entries requeued, next attempt in {:?}: {}",
                        failures, requeued, delay, e
                    );
                } else {
                    warn!(
                        "Delivery failed ({} in a row), {} entries requeued: {}",
                        failures, requeued, e
                    );
                }

                FlushOutcome::Failed {
                    requeued,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Clears the in-flight flag when the attempt ends or is dropped.
struct InFlightFlag<'a>(&'a AtomicBool);

impl Drop for InFlightFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Snapshot taken off the queue; requeued at the head unless confirmed.
struct InFlightBatch<'a> {
    queue: &'a EventQueue,
    entries: Option<Vec<LogEntry>>,
}

impl<'a> InFlightBatch<'a> {
    fn new(queue: &'a EventQueue, entries: Vec<LogEntry>) -> Self {
        Self {
            queue,
            entries: Some(entries),
        }
    }

    fn entries(&self) -> &[LogEntry] {
        self.entries.as_deref().unwrap_or(&[])
    }

    /// Delivery confirmed: the snapshot leaves for good.
    fn confirm(&mut self) -> usize {
        self.entries.take().map(|e| e.len()).unwrap_or(0)
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if let Some(entries) = self.entries.take() {
            self.queue.requeue_front(entries);
        }
    }
}
