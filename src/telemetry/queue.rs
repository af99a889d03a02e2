//! Ordered in-memory buffer of pending entries.
//!
//! All mutations (append, take, requeue) go through one mutex, so they are
//! atomic with respect to each other and to concurrent flush triggers.

use crate::types::LogEntry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// FIFO queue of entries awaiting delivery.
#[derive(Debug)]
pub struct EventQueue {
    entries: Mutex<VecDeque<LogEntry>>,

    /// Length beyond which the flush scheduler is woken
    flush_threshold: usize,

    /// Wakes the scheduler on the size trigger
    pressure: Arc<Notify>,

    total_enqueued: AtomicU64,
}

impl EventQueue {
    pub fn new(flush_threshold: usize) -> Self {
        EventQueue {
            entries: Mutex::new(VecDeque::new()),
            flush_threshold,
            pressure: Arc::new(Notify::new()),
            total_enqueued: AtomicU64::new(0),
        }
    }

    /// Append to the tail. Never blocks on delivery, never drops.
    ///
    /// Returns the new queue length. When it exceeds the flush threshold the
    /// scheduler is notified.
    pub fn enqueue(&self, entry: LogEntry) -> usize {
        let len = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            entries.len()
        };
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);

        if len > self.flush_threshold {
            self.pressure.notify_one();
        }
        len
    }

    /// Remove and return every pending entry, oldest first.
    pub fn take_all(&self) -> Vec<LogEntry> {
        self.entries.lock().drain(..).collect()
    }

    /// Put a batch back at the head, ahead of anything enqueued since it was taken.
    pub fn requeue_front(&self, batch: Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        for entry in batch.into_iter().rev() {
            entries.push_front(entry);
        }
    }

    /// Copy of the pending entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True while the queue holds more than the flush threshold.
    pub fn over_threshold(&self) -> bool {
        self.len() > self.flush_threshold
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    /// Notifier fired when the size trigger trips.
    pub fn pressure(&self) -> Arc<Notify> {
        Arc::clone(&self.pressure)
    }
}
