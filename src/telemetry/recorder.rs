//! # Telemetry Recorder
//!
//! The single entry point UI code records through. Turns `(type, data)` into
//! a filtered, differentially reduced [`LogEntry`] and appends it to the
//! queue.

use super::differential::{DifferentialTracker, FieldValue};
use super::filter::EventFilter;
use super::queue::EventQueue;
use crate::config::{PipelineConfig, AI_ENABLED_FIELD};
use crate::error::Result;
use crate::storage::CounterState;
use crate::types::{EventType, LogEntry, Session};
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Keys an event's data may never set.
const RESERVED_KEYS: [&str; 5] = ["userId", "sessionId", "timestamp", "type", AI_ENABLED_FIELD];

/// Mutable recording state, guarded as one unit so that differential
/// decisions and queue order always agree.
struct RecorderState {
    tracker: DifferentialTracker,
    ai_enabled: bool,
}

/// Thread-safe interaction recorder
pub struct TelemetryRecorder {
    /// Recording switched on
    enabled: bool,

    user_id: u64,

    session: Session,

    /// Redaction rules
    filter: EventFilter,

    /// Differential state and the AI flag
    state: Mutex<RecorderState>,

    /// Shared counters attached to every entry
    counters: Arc<CounterState>,

    /// Destination of recorded entries
    queue: Arc<EventQueue>,

    /// Entries appended to the queue
    recorded: RwLock<u64>,

    /// Events dropped because their type is suppressed
    suppressed: RwLock<u64>,
}

impl TelemetryRecorder {
    /// Create a new recorder
    pub fn new(
        config: &PipelineConfig,
        user_id: u64,
        session: Session,
        counters: Arc<CounterState>,
        queue: Arc<EventQueue>,
    ) -> Result<Self> {
        let filter = EventFilter::new(config.filter.clone())?;
        let tracker = DifferentialTracker::new(config.differential, &config.forced_fields);

        Ok(TelemetryRecorder {
            enabled: config.enabled,
            user_id,
            session,
            filter,
            state: Mutex::new(RecorderState {
                tracker,
                ai_enabled: true,
            }),
            counters,
            queue,
            recorded: RwLock::new(0),
            suppressed: RwLock::new(0),
        })
    }

    /// Record one interaction.
    ///
    /// `data` should be a JSON object; anything else is recorded without a
    /// payload. Returns the entry as queued, or `None` when recording is off
    /// or the type is suppressed.
    pub fn record(&self, event_type: EventType, data: Value) -> Option<LogEntry> {
        self.record_with(event_type, data, |_| ()).1
    }

    /// Apply `mutate` to the counters and record, as one step.
    ///
    /// Concurrent recorders never observe the counter change without its
    /// entry, so `rewriteCount` values appear in the queue in order.
    pub fn record_with<R, F>(&self, event_type: EventType, data: Value, mutate: F) -> (R, Option<LogEntry>)
    where
        F: FnOnce(&CounterState) -> R,
    {
        let mut state = self.state.lock();
        let result = mutate(&self.counters);

        if !self.enabled {
            return (result, None);
        }
        if self.filter.is_suppressed(&event_type) {
            debug!("Suppressed '{}' event", event_type);
            *self.suppressed.write() += 1;
            return (result, None);
        }

        let raw = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                debug!("Ignoring non-object payload for '{}': {}", event_type, other);
                Map::new()
            }
        };

        let counters = self.counters.snapshot();
        let mut data = self.filter.filter(&event_type, &raw);
        data.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()) && !counters.contains_key(key));

        let fields = counters
            .into_iter()
            .map(|(name, value)| (name, FieldValue::Count(value)))
            .chain(std::iter::once((
                AI_ENABLED_FIELD.to_string(),
                FieldValue::Flag(state.ai_enabled),
            )));
        let included = state.tracker.reduce(&event_type, fields);

        let mut entry = LogEntry::new(self.user_id, self.session.session_id.clone(), event_type);
        for (field, value) in included {
            match value {
                FieldValue::Flag(flag) if field == AI_ENABLED_FIELD => entry.ai_enabled = Some(flag),
                FieldValue::Count(count) => {
                    entry.counters.insert(field, count);
                }
                FieldValue::Flag(flag) => {
                    entry.data.insert(field, Value::from(flag));
                }
            }
        }
        entry.data.extend(data);

        self.queue.enqueue(entry.clone());
        *self.recorded.write() += 1;
        drop(state);

        (result, Some(entry))
    }

    /// Update the AI flag and record the mandatory `ai_toggle` event.
    pub fn set_ai_enabled(&self, enabled: bool) -> Option<LogEntry> {
        self.state.lock().ai_enabled = enabled;
        self.record(EventType::AiToggle, Value::Null)
    }

    pub fn ai_enabled(&self) -> bool {
        self.state.lock().ai_enabled
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Check if recording is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn recorded(&self) -> u64 {
        *self.recorded.read()
    }

    pub fn suppressed(&self) -> u64 {
        *self.suppressed.read()
    }
}

/// Telemetry statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryStats {
    /// Entries appended to the queue
    pub recorded: u64,
    /// Events dropped by type suppression
    pub suppressed: u64,
    /// Entries confirmed delivered
    pub delivered: u64,
    /// Delivery attempts that failed
    pub failed_attempts: u64,
    /// Delivery attempts that succeeded
    pub successful_attempts: u64,
    /// Entries removed by collapsing
    pub collapsed: u64,
    /// Entries dropped because they could not be serialized
    pub dropped_malformed: u64,
    /// Entries currently waiting
    pub queue_len: usize,
}

impl TelemetryStats {
    pub fn attempt_success_rate(&self) -> f64 {
        let attempts = self.successful_attempts + self.failed_attempts;
        if attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 / attempts as f64
        }
    }
}
