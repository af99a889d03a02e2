//! Differential encoding of shared mutable fields.
//!
//! Counters and the AI flag are attached to an entry only when their value
//! differs from the value last committed for that field. Every considered
//! field is committed after each entry, included or not, so a value that
//! changes and changes back is never emitted as a phantom change.

use crate::types::EventType;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Value of a tracked shared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Count(u64),
    Flag(bool),
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Count(n) => Value::from(n),
            FieldValue::Flag(b) => Value::from(b),
        }
    }
}

/// Remembers the last committed value of each tracked field.
#[derive(Debug, Clone)]
pub struct DifferentialTracker {
    /// When false every field is always included
    enabled: bool,
    last_committed: HashMap<String, FieldValue>,
    /// Event type -> fields that type always carries
    forced: HashMap<EventType, HashSet<String>>,
}

impl DifferentialTracker {
    pub fn new(enabled: bool, forced_fields: &HashMap<EventType, Vec<String>>) -> Self {
        let forced = forced_fields
            .iter()
            .map(|(event_type, fields)| (event_type.clone(), fields.iter().cloned().collect()))
            .collect();

        DifferentialTracker {
            enabled,
            last_committed: HashMap::new(),
            forced,
        }
    }

    /// True if `value` must be emitted for `field`.
    pub fn should_include(&self, field: &str, value: FieldValue) -> bool {
        if !self.enabled {
            return true;
        }
        self.last_committed.get(field) != Some(&value)
    }

    /// True if `event_type` mandates `field` regardless of change.
    pub fn is_forced(&self, event_type: &EventType, field: &str) -> bool {
        self.forced
            .get(event_type)
            .map(|fields| fields.contains(field))
            .unwrap_or(false)
    }

    pub fn commit(&mut self, field: &str, value: FieldValue) {
        self.last_committed.insert(field.to_string(), value);
    }

    /// Decide inclusion for every field of one entry, then commit them all.
    ///
    /// Returns the fields to emit, in input order.
    pub fn reduce<I>(&mut self, event_type: &EventType, fields: I) -> Vec<(String, FieldValue)>
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        let considered: Vec<(String, FieldValue)> = fields.into_iter().collect();

        let included = considered
            .iter()
            .filter(|(field, value)| {
                self.should_include(field, *value) || self.is_forced(event_type, field)
            })
            .cloned()
            .collect();

        for (field, value) in considered {
            self.commit(&field, value);
        }

        included
    }

    /// Last committed value of `field`, if any.
    pub fn last_committed(&self, field: &str) -> Option<FieldValue> {
        self.last_committed.get(field).copied()
    }
}
