use crate::config::PipelineConfig;
use crate::error::Result;
use crate::flush::{FlushOutcome, FlushScheduler, FlushService, SchedulerConfig};
use crate::storage::{
    CounterState, IdentityStore, StateStore, ITEM_COUNT, RESET_COUNT, REWRITE_COUNT,
};
use crate::telemetry::{BatchOptimizer, EventQueue, TelemetryRecorder, TelemetryStats};
use crate::transport::{HttpTransport, Transport};
use crate::types::{EventType, LogEntry, Session};
use log::info;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Outcome of a call to the emotion-analysis backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    Success { item_count: u64, duration_ms: f64 },
    Failure { error: String, duration_ms: f64 },
}

/// The telemetry pipeline as one service object.
///
/// Constructed once at process start and shared by `Arc`. UI code talks to
/// it through [`Pipeline::record`] and the convenience actions; the pipeline
/// owns identity, counters, filtering, queueing and delivery.
///
/// # Lifecycle
/// - `new`: resolve identity, load counters, start a fresh session
/// - `start`: spawn the periodic flush task (needs a tokio runtime)
/// - `shutdown`: stop the task and make one bounded final flush
///
/// # Thread Safety
/// Every method takes `&self`. Queue mutations are atomic, and recording
/// holds one lock across the differential decision and the enqueue, so the
/// queue order always matches the differential encoding order.
pub struct Pipeline {
    config: PipelineConfig,
    identity: IdentityStore,
    counters: Arc<CounterState>,
    recorder: TelemetryRecorder,
    queue: Arc<EventQueue>,
    flusher: Arc<FlushService>,
    scheduler: Arc<FlushScheduler>,
}

impl Pipeline {
    /// Build a pipeline over `store` delivering through `transport`.
    ///
    /// Resolves the participant id, loads the persisted counters and starts
    /// a fresh session. Does not spawn anything; call [`Pipeline::start`] for
    /// scheduled flushes.
    ///
    /// # Arguments
    /// - `config`: pipeline configuration, validated before use
    /// - `store`: backend holding `userId` and `interactionCounters`
    /// - `transport`: collector client receiving each batch
    ///
    /// # Returns
    /// A ready pipeline, or `TelemetryError::InvalidConfig` when the
    /// configuration or one of its deny patterns is invalid. Store failures
    /// never fail construction.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use beacon::{FileStore, HttpTransport, Pipeline, PipelineConfig};
    ///
    /// let config = PipelineConfig::default();
    /// let store = FileStore::open_or_memory(&config.state_path);
    /// let transport = Arc::new(HttpTransport::from_config(&config)?);
    /// let pipeline = Pipeline::new(config, store, transport)?;
    /// pipeline.rewrite();
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let identity = IdentityStore::new(Arc::clone(&store));
        let user_id = match config.participant_id {
            Some(assigned) => identity.assign(assigned),
            None => identity.get_or_create_user_id(),
        };
        let counters = Arc::new(CounterState::load(store));
        let session = Session::generate();

        let queue = Arc::new(EventQueue::new(config.flush_threshold));
        let recorder = TelemetryRecorder::new(
            &config,
            user_id,
            session,
            Arc::clone(&counters),
            Arc::clone(&queue),
        )?;

        let optimizer =
            BatchOptimizer::new(config.collapse_window, config.collapsible_types.clone());
        let flusher = Arc::new(FlushService::new(
            Arc::clone(&queue),
            optimizer,
            transport,
            config.retry.clone(),
        ));
        let scheduler = Arc::new(FlushScheduler::new(
            Arc::clone(&flusher),
            queue.pressure(),
            SchedulerConfig::from(&config),
        ));

        info!(
            "Telemetry pipeline ready: user {}, session {}, differential={}",
            user_id,
            recorder.session().session_id,
            config.differential
        );

        Ok(Pipeline {
            config,
            identity,
            counters,
            recorder,
            queue,
            flusher,
            scheduler,
        })
    }

    /// Pipeline delivering over HTTP to `config.collector_url`.
    pub fn with_http(config: PipelineConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        Self::new(config, store, transport)
    }

    /// Build, wrap in `Arc` and start the flush task.
    pub fn launch(
        config: PipelineConfig,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        let pipeline = Arc::new(Self::new(config, store, transport)?);
        pipeline.start();
        Ok(pipeline)
    }

    /// Spawn the periodic flush task on the current tokio runtime.
    pub fn start(&self) {
        self.scheduler.spawn();
    }

    // ============================================================================================
    // RECORDING
    // ============================================================================================

    /// Record one interaction. Never fails and never blocks on delivery.
    pub fn record(&self, event_type: impl Into<EventType>, data: Value) -> Option<LogEntry> {
        self.recorder.record(event_type.into(), data)
    }

    /// Increment `rewriteCount` and record a `rewrite` event.
    pub fn rewrite(&self) -> u64 {
        self.recorder
            .record_with(EventType::Rewrite, Value::Null, |c| c.increment(REWRITE_COUNT))
            .0
    }

    /// Increment `resetCount` and record a `reset` event.
    pub fn reset(&self) -> u64 {
        self.recorder
            .record_with(EventType::Reset, Value::Null, |c| c.increment(RESET_COUNT))
            .0
    }

    /// Switch the AI feature and record the toggle.
    pub fn set_ai_enabled(&self, enabled: bool) -> Option<LogEntry> {
        self.recorder.set_ai_enabled(enabled)
    }

    /// Record a manual emotion adjustment on one sentence.
    ///
    /// Emotions missing from either side count as 0. Only emotions whose
    /// value differs are listed; the filter then drops insignificant ones
    /// and the sentence text itself.
    pub fn log_emotion_change(
        &self,
        sentence_id: u64,
        sentence: &str,
        original: &BTreeMap<String, f64>,
        updated: &BTreeMap<String, f64>,
    ) -> Option<LogEntry> {
        let emotions: BTreeSet<&String> = original.keys().chain(updated.keys()).collect();

        let deltas: Vec<Value> = emotions
            .into_iter()
            .filter_map(|emotion| {
                let from = original.get(emotion).copied().unwrap_or(0.0);
                let to = updated.get(emotion).copied().unwrap_or(0.0);
                (from != to).then(|| json!({"emotion": emotion, "from": from, "to": to}))
            })
            .collect();

        self.record(
            EventType::EmotionModified,
            json!({
                "sentenceId": sentence_id,
                "sentence": sentence,
                "emotionDelta": deltas,
            }),
        )
    }

    /// Record the outcome of an analysis request.
    ///
    /// Success also stores the returned item count in `itemCount`.
    pub fn log_api_outcome(&self, outcome: &ApiOutcome) -> Option<LogEntry> {
        match outcome {
            ApiOutcome::Success {
                item_count,
                duration_ms,
            } => {
                let mut data = Map::new();
                data.insert("duration".to_string(), json!(round2(*duration_ms)));
                self.recorder
                    .record_with(EventType::ApiSuccess, Value::Object(data), |c| {
                        c.set(ITEM_COUNT, *item_count)
                    })
                    .1
            }
            ApiOutcome::Failure { error, duration_ms } => self.record(
                EventType::ApiError,
                json!({"error": error, "duration": duration_ms}),
            ),
        }
    }

    // ============================================================================================
    // DELIVERY
    // ============================================================================================

    /// Attempt delivery now. No-op if an attempt is already in flight.
    pub async fn flush(&self) -> FlushOutcome {
        self.flusher.flush().await
    }

    /// Stop scheduled flushing and make a final attempt bounded by
    /// `shutdown_grace`. `None` means the attempt did not settle in time.
    pub async fn shutdown(&self) -> Option<FlushOutcome> {
        info!(
            "Shutting down telemetry pipeline with {} entries pending",
            self.queue.len()
        );
        self.scheduler.shutdown().await
    }

    // ============================================================================================
    // ACCESSORS
    // ============================================================================================

    pub fn user_id(&self) -> u64 {
        self.recorder.user_id()
    }

    pub fn session(&self) -> &Session {
        self.recorder.session()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn counters(&self) -> &CounterState {
        &self.counters
    }

    pub fn ai_enabled(&self) -> bool {
        self.recorder.ai_enabled()
    }

    /// True when the user id could not be persisted.
    pub fn identity_is_ephemeral(&self) -> bool {
        self.identity.is_ephemeral()
    }

    /// Entries waiting for delivery, oldest first.
    pub fn pending(&self) -> Vec<LogEntry> {
        self.queue.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn stats(&self) -> TelemetryStats {
        let flush = self.flusher.stats();
        TelemetryStats {
            recorded: self.recorder.recorded(),
            suppressed: self.recorder.suppressed(),
            delivered: flush.delivered,
            failed_attempts: flush.failed_attempts,
            successful_attempts: flush.successful_attempts,
            collapsed: flush.collapsed,
            dropped_malformed: flush.dropped_malformed,
            queue_len: self.queue.len(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
