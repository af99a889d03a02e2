//! Pipeline configuration.
//!
//! All tunables of the pipeline live in [`PipelineConfig`]. Defaults match the
//! dashboard's historical behaviour (30 s timer, flush beyond 20 entries,
//! 500 ms collapse window). Every field can also be set from `BEACON_*`
//! environment variables via [`PipelineConfig::from_env`].

use crate::error::{Result, TelemetryError};
use crate::telemetry::FilterConfig;
use crate::types::EventType;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Wire name of the AI feature flag field.
pub const AI_ENABLED_FIELD: &str = "aiEnabled";

/// Bounded exponential backoff applied after failed deliveries.
///
/// Backoff only postpones timer and size triggered attempts. Entries are
/// never dropped because of it and the shutdown flush ignores it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `consecutive_failures` failures.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Configuration for the whole pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Enable telemetry recording
    pub enabled: bool,

    /// Base URL of the collector; batches go to `{collector_url}/log-interaction`
    pub collector_url: String,

    /// Timer trigger period
    pub flush_interval: Duration,

    /// Queue length beyond which a flush is triggered immediately
    pub flush_threshold: usize,

    /// Upper bound on the final flush during shutdown
    pub shutdown_grace: Duration,

    /// Per-request timeout for the HTTP transport
    pub request_timeout: Duration,

    /// Maximum gap between consecutive entries of a collapsible run
    pub collapse_window: Duration,

    /// Event types whose rapid repeats are collapsed to the latest one
    pub collapsible_types: HashSet<EventType>,

    /// Emit shared fields only when they changed since last emitted
    pub differential: bool,

    /// Fields always included for a given event type
    pub forced_fields: HashMap<EventType, Vec<String>>,

    /// Redaction and thresholding rules
    pub filter: FilterConfig,

    /// Optional backoff after failed deliveries (off = retry on every trigger)
    pub retry: Option<RetryPolicy>,

    /// Externally assigned participant id, persisted in place of a generated one
    pub participant_id: Option<u64>,

    /// JSON state file used by the replay binary
    pub state_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut forced_fields = HashMap::new();
        forced_fields.insert(EventType::AiToggle, vec![AI_ENABLED_FIELD.to_string()]);

        PipelineConfig {
            enabled: true,
            collector_url: "http://localhost:5000".to_string(),
            flush_interval: Duration::from_secs(30),
            flush_threshold: 20,
            shutdown_grace: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            collapse_window: Duration::from_millis(500),
            collapsible_types: [EventType::HelpClicked, EventType::UploadClicked]
                .into_iter()
                .collect(),
            differential: true,
            forced_fields,
            filter: FilterConfig::default(),
            retry: None,
            participant_id: None,
            state_path: PathBuf::from("./var/beacon/state.json"),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `BEACON_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `BEACON_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PipelineConfig::default();

        if let Some(url) = lookup("BEACON_COLLECTOR_URL") {
            config.collector_url = url.trim_end_matches('/').to_string();
        }
        if let Some(enabled) = parse_var::<bool, _>(&lookup, "BEACON_ENABLED")? {
            config.enabled = enabled;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "BEACON_FLUSH_INTERVAL_SECS")? {
            config.flush_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = parse_var::<usize, _>(&lookup, "BEACON_FLUSH_THRESHOLD")? {
            config.flush_threshold = threshold;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "BEACON_COLLAPSE_WINDOW_MS")? {
            config.collapse_window = Duration::from_millis(ms);
        }
        if let Some(differential) = parse_var::<bool, _>(&lookup, "BEACON_DIFFERENTIAL")? {
            config.differential = differential;
        }
        if let Some(path) = lookup("BEACON_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }
        if let Some(user_id) = parse_var::<u64, _>(&lookup, "BEACON_USER_ID")? {
            config.participant_id = Some(user_id);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler or transport cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(TelemetryError::InvalidConfig(
                "flush_threshold must be at least 1".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "flush_interval must be non-zero".to_string(),
            ));
        }
        if !(self.collector_url.starts_with("http://") || self.collector_url.starts_with("https://"))
        {
            return Err(TelemetryError::InvalidConfig(format!(
                "collector_url must be an http(s) URL, got '{}'",
                self.collector_url
            )));
        }
        if !(0.0..=1.0).contains(&self.filter.delta_threshold) {
            return Err(TelemetryError::InvalidConfig(
                "delta_threshold must lie within 0..=1".to_string(),
            ));
        }
        Ok(())
    }

    /// Collector endpoint receiving batches.
    pub fn endpoint(&self) -> String {
        format!("{}/log-interaction", self.collector_url.trim_end_matches('/'))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| TelemetryError::InvalidConfig(format!("{}='{}': {}", key, raw, e))),
    }
}
