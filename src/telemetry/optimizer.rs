//! Batch optimizer: collapses bursts of low-information events.

use crate::types::{EventType, LogEntry};
use std::collections::HashSet;
use std::time::Duration;

/// Keeps only the latest entry of each run of consecutive, same-type,
/// collapsible entries spaced less than `window` apart.
///
/// Tracked fields are committed when an entry is recorded, so a dropped
/// entry may be the only carrier of a changed counter or AI flag. The
/// survivor inherits every such field it does not carry itself.
#[derive(Debug, Clone)]
pub struct BatchOptimizer {
    window: Duration,
    collapsible: HashSet<EventType>,
}

impl BatchOptimizer {
    pub fn new(window: Duration, collapsible: HashSet<EventType>) -> Self {
        BatchOptimizer {
            window,
            collapsible,
        }
    }

    pub fn is_collapsible(&self, event_type: &EventType) -> bool {
        self.collapsible.contains(event_type)
    }

    /// Optimized copy of `entries`; relative order is never changed.
    pub fn optimize(&self, entries: &[LogEntry]) -> Vec<LogEntry> {
        let window_ms = self.window.as_millis() as i64;
        let mut optimized: Vec<LogEntry> = Vec::with_capacity(entries.len());

        for (i, current) in entries.iter().enumerate() {
            // Compare with the raw predecessor so a whole burst chains together
            let collapses = i > 0 && {
                let previous = &entries[i - 1];
                current.event_type == previous.event_type
                    && self.is_collapsible(&current.event_type)
                    && current.millis_since(previous) < window_ms
            };

            match optimized.last_mut() {
                Some(last) if collapses => *last = absorb(last, current),
                _ => optimized.push(current.clone()),
            }
        }

        optimized
    }
}

/// `current` plus the tracked fields only `dropped` carries.
fn absorb(dropped: &LogEntry, current: &LogEntry) -> LogEntry {
    let mut survivor = current.clone();
    for (name, value) in &dropped.counters {
        survivor.counters.entry(name.clone()).or_insert(*value);
    }
    if survivor.ai_enabled.is_none() {
        survivor.ai_enabled = dropped.ai_enabled;
    }
    survivor
}
