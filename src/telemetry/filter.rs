//! # Event Filter
//!
//! Per-event-type redaction and thresholding applied to raw event data
//! before it enters an entry.
//!
//! | Event type         | Rule                                                   |
//! |--------------------|--------------------------------------------------------|
//! | `emotion_modified` | keep deltas with `abs(to - from) >= threshold`, round  |
//! | `api_error`        | keep only `errorType` (text before first `:`) + duration |
//! | anything else      | copy everything except deny-listed keys                |
//!
//! Deny-listed keys (free text, context) are removed at every nesting level,
//! so filtered output never carries user-authored text.

use crate::error::{Result, TelemetryError};
use crate::types::EventType;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Tolerance for float noise when comparing a delta with the threshold.
const DELTA_EPSILON: f64 = 1e-9;

/// Redaction and thresholding configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Keys never copied into an entry
    pub deny_list: HashSet<String>,

    /// Key patterns never copied into an entry
    pub deny_patterns: Vec<String>,

    /// Minimum absolute emotion change worth keeping (0-1 scale)
    pub delta_threshold: f64,

    /// Event types that are not recorded at all
    pub suppressed_types: HashSet<EventType>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            deny_list: ["sentence", "newSentence", "context"]
                .into_iter()
                .map(String::from)
                .collect(),
            deny_patterns: vec![r"(?i)sentence$".to_string(), r"(?i)text$".to_string()],
            delta_threshold: 0.05,
            suppressed_types: [EventType::ApiAnalyze].into_iter().collect(),
        }
    }
}

/// Applies [`FilterConfig`] rules to raw event data.
#[derive(Debug, Clone)]
pub struct EventFilter {
    config: FilterConfig,
    deny_patterns: Vec<Regex>,
    error_category: Regex,
}

impl EventFilter {
    pub fn new(config: FilterConfig) -> Result<Self> {
        let deny_patterns = config
            .deny_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    TelemetryError::InvalidConfig(format!("deny pattern '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let error_category = Regex::new(r"^([^:]+):")
            .map_err(|e| TelemetryError::InvalidConfig(e.to_string()))?;

        Ok(EventFilter {
            config,
            deny_patterns,
            error_category,
        })
    }

    /// True if events of this type are dropped before recording.
    pub fn is_suppressed(&self, event_type: &EventType) -> bool {
        self.config.suppressed_types.contains(event_type)
    }

    /// Reduce `raw` to the fields allowed for `event_type`.
    pub fn filter(&self, event_type: &EventType, raw: &Map<String, Value>) -> Map<String, Value> {
        match event_type {
            EventType::EmotionModified => self.filter_emotion_delta(raw),
            EventType::ApiError => self.filter_error(raw),
            _ => self.redact(raw),
        }
    }

    fn is_denied(&self, key: &str) -> bool {
        self.config.deny_list.contains(key) || self.deny_patterns.iter().any(|re| re.is_match(key))
    }

    /// Default rule: copy everything except denied keys, recursively.
    fn redact(&self, raw: &Map<String, Value>) -> Map<String, Value> {
        raw.iter()
            .filter(|(key, _)| !self.is_denied(key))
            .map(|(key, value)| (key.clone(), self.redact_value(value)))
            .collect()
    }

    fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.redact(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            other => other.clone(),
        }
    }

    /// Numeric-delta rule for emotion adjustments.
    fn filter_emotion_delta(&self, raw: &Map<String, Value>) -> Map<String, Value> {
        let mut rest = raw.clone();
        let deltas = rest.remove("emotionDelta");
        let duration = rest.remove("duration");

        let mut filtered = self.redact(&rest);

        if let Some(Value::Array(items)) = deltas {
            let kept: Vec<Value> = items
                .iter()
                .filter_map(|item| self.significant_delta(item))
                .collect();
            if !kept.is_empty() {
                filtered.insert("emotionDelta".to_string(), Value::Array(kept));
            }
        }

        if let Some(duration) = duration.as_ref().and_then(as_number) {
            filtered.insert("duration".to_string(), Value::from(round2(duration)));
        }

        filtered
    }

    fn significant_delta(&self, item: &Value) -> Option<Value> {
        let triple = item.as_object()?;
        let from = triple.get("from").and_then(as_number)?;
        let to = triple.get("to").and_then(as_number)?;

        if (to - from).abs() + DELTA_EPSILON < self.config.delta_threshold {
            return None;
        }

        let mut kept = Map::new();
        if let Some(emotion) = triple.get("emotion").and_then(Value::as_str) {
            kept.insert("emotion".to_string(), Value::from(emotion));
        }
        kept.insert("from".to_string(), Value::from(round2(from)));
        kept.insert("to".to_string(), Value::from(round2(to)));
        Some(Value::Object(kept))
    }

    /// Error rule: coarse category plus duration, nothing else.
    fn filter_error(&self, raw: &Map<String, Value>) -> Map<String, Value> {
        let mut filtered = Map::new();

        let category = raw
            .get("error")
            .and_then(Value::as_str)
            .and_then(|message| self.error_category.captures(message))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|category| !category.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        filtered.insert("errorType".to_string(), Value::from(category));

        if let Some(duration) = raw.get("duration").and_then(as_number) {
            filtered.insert("duration".to_string(), Value::from(round2(duration)));
        }

        filtered
    }
}

/// Number, or a string holding one.
fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
