//! Core data types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ================================================================================================
// EVENT TYPES
// ================================================================================================

/// Kind of tracked interaction. Serialized as its wire string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Rewrite,
    Reset,
    AiToggle,
    EmotionModified,
    SentenceEdited,
    ApiSuccess,
    ApiError,
    ApiAnalyze,
    HelpClicked,
    UploadClicked,
    ButtonClicked,
    /// Any other UI-defined event type
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Rewrite => "rewrite",
            EventType::Reset => "reset",
            EventType::AiToggle => "ai_toggle",
            EventType::EmotionModified => "emotion_modified",
            EventType::SentenceEdited => "sentence_edited",
            EventType::ApiSuccess => "api_success",
            EventType::ApiError => "api_error",
            EventType::ApiAnalyze => "api_analyze",
            EventType::HelpClicked => "help_clicked",
            EventType::UploadClicked => "upload_clicked",
            EventType::ButtonClicked => "button_clicked",
            EventType::Custom(name) => name,
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "rewrite" => EventType::Rewrite,
            "reset" => EventType::Reset,
            "ai_toggle" => EventType::AiToggle,
            "emotion_modified" => EventType::EmotionModified,
            "sentence_edited" => EventType::SentenceEdited,
            "api_success" => EventType::ApiSuccess,
            "api_error" => EventType::ApiError,
            "api_analyze" => EventType::ApiAnalyze,
            "help_clicked" => EventType::HelpClicked,
            "upload_clicked" => EventType::UploadClicked,
            "button_clicked" => EventType::ButtonClicked,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::from(value.as_str())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ================================================================================================
// LOG ENTRY
// ================================================================================================

/// One recorded, filtered and differentially reduced interaction.
///
/// Serializes to the collector wire shape:
/// `{userId, sessionId, timestamp, type, <changed counters>, [aiEnabled], <data>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub user_id: u64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Counters whose value changed since they were last emitted
    #[serde(flatten)]
    pub counters: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_enabled: Option<bool>,
    /// Filtered type-specific payload
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl LogEntry {
    /// Bare entry with no tracked fields and no payload.
    pub fn new(user_id: u64, session_id: impl Into<String>, event_type: EventType) -> Self {
        LogEntry {
            user_id,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            event_type,
            counters: BTreeMap::new(),
            ai_enabled: None,
            data: Map::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Signed milliseconds from `earlier` to this entry.
    pub fn millis_since(&self, earlier: &LogEntry) -> i64 {
        (self.timestamp - earlier.timestamp).num_milliseconds()
    }
}

// ================================================================================================
// SESSION
// ================================================================================================

/// Per-start session identity. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session: base-36 epoch milliseconds followed by a random suffix.
    pub fn generate() -> Self {
        let session_id = format!("{}{}", to_base36(now_ms()), Uuid::new_v4().simple());
        Session {
            session_id,
            created_at: Utc::now(),
        }
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
