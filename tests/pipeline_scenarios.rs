//! End-to-end pipeline tests against scripted transports.
//!
//! Tests verify:
//! - Identity and counter persistence across pipeline instances
//! - Differential encoding of counters and the AI flag on the wire
//! - Order preservation and no loss across failed deliveries
//! - Timer, size and shutdown triggers
//! - Single in-flight attempt with concurrent recording

mod common;

use beacon::storage::{FileStore, MemoryStore, StateStore, COUNTERS_KEY, USER_ID_KEY};
use beacon::{EventType, FlushOutcome, Pipeline, PipelineConfig, SkipReason};
use common::{
    field_values, pipeline_with, quiet_config, wait_until, GatedTransport, RecordingTransport,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// IDENTITY & COUNTERS
// ============================================================================

#[tokio::test]
async fn test_fresh_load_rewrite_scenario() {
    let store = Arc::new(MemoryStore::with_values([(USER_ID_KEY, "42")]));
    let transport = RecordingTransport::new();
    let pipeline = Pipeline::new(quiet_config(), store.clone(), transport.clone()).unwrap();
    assert_eq!(pipeline.user_id(), 42);

    assert_eq!(pipeline.rewrite(), 1);
    assert_eq!(pipeline.rewrite(), 2);
    assert_eq!(pipeline.rewrite(), 3);

    let outcome = pipeline.flush().await;
    assert_eq!(
        outcome,
        FlushOutcome::Delivered {
            sent: 3,
            collapsed: 0,
            dropped: 0
        }
    );

    let batches = transport.accepted();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(field_values(batch, "rewriteCount"), vec![json!(1), json!(2), json!(3)]);
    assert_eq!(field_values(batch, "type"), vec![json!("rewrite"); 3]);
    assert_eq!(field_values(batch, "userId"), vec![json!(42); 3]);

    // Only the first entry carries the unchanged shared fields
    assert_eq!(batch[0]["resetCount"], json!(0));
    assert_eq!(batch[0]["aiEnabled"], json!(true));
    for entry in &batch[1..] {
        assert!(entry.get("resetCount").is_none());
        assert!(entry.get("aiEnabled").is_none());
    }

    assert_eq!(pipeline.queue_len(), 0);
    let counters: Value =
        serde_json::from_str(&store.get(COUNTERS_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(counters["rewriteCount"], json!(3));
}

#[tokio::test]
async fn test_identity_and_counters_survive_reload() {
    let store = Arc::new(MemoryStore::new());

    let first = Pipeline::new(quiet_config(), store.clone(), RecordingTransport::new()).unwrap();
    let user_id = first.user_id();
    first.rewrite();
    first.reset();
    let first_session = first.session().session_id.clone();
    drop(first);

    let second = Pipeline::new(quiet_config(), store.clone(), RecordingTransport::new()).unwrap();
    assert_eq!(second.user_id(), user_id);
    assert_ne!(second.session().session_id, first_session);
    assert_eq!(second.rewrite(), 2);
    assert_eq!(second.reset(), 2);
}

// ============================================================================
// DIFFERENTIAL ENCODING & FILTERING
// ============================================================================

#[tokio::test]
async fn test_ai_toggle_forces_flag_and_other_events_omit_it() {
    let transport = RecordingTransport::new();
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    pipeline.record(EventType::ButtonClicked, json!({"button": "analyze"}));
    pipeline.set_ai_enabled(true);
    pipeline.record(EventType::ButtonClicked, json!({"button": "analyze"}));
    pipeline.set_ai_enabled(false);
    pipeline.record(EventType::ButtonClicked, json!({"button": "analyze"}));
    pipeline.flush().await;

    let entries = transport.accepted_entries();
    assert_eq!(
        field_values(&entries, "aiEnabled"),
        vec![json!(true), json!(true), Value::Null, json!(false), Value::Null]
    );
}

#[tokio::test]
async fn test_non_differential_mode_repeats_shared_fields() {
    let transport = RecordingTransport::new();
    let config = PipelineConfig {
        differential: false,
        ..quiet_config()
    };
    let (pipeline, _store) = pipeline_with(config, transport.clone());

    pipeline.rewrite();
    pipeline.record(EventType::HelpClicked, Value::Null);
    pipeline.flush().await;

    for entry in transport.accepted_entries() {
        assert_eq!(entry["rewriteCount"], json!(1));
        assert_eq!(entry["resetCount"], json!(0));
        assert_eq!(entry["aiEnabled"], json!(true));
    }
}

#[tokio::test]
async fn test_wire_payload_never_contains_sentence_text() {
    let transport = RecordingTransport::new();
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    pipeline.record(
        EventType::SentenceEdited,
        json!({"sentenceId": 4, "sentence": "my private words", "newSentence": "my private edit"}),
    );
    pipeline.record(
        EventType::ApiAnalyze,
        json!({"text": "my private words"}),
    );
    pipeline.record(
        EventType::ApiError,
        json!({"error": "ValueError: could not parse 'my private words'", "duration": 3.14159}),
    );
    pipeline.flush().await;

    let rendered = serde_json::to_string(&transport.accepted_entries()).unwrap();
    assert!(!rendered.contains("private"));

    let entries = transport.accepted_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["sentenceId"], json!(4));
    assert_eq!(entries[1]["errorType"], json!("ValueError"));
    assert_eq!(entries[1]["duration"], json!(3.14));
    assert_eq!(pipeline.stats().suppressed, 1);
}

#[tokio::test]
async fn test_event_data_cannot_override_envelope_or_counters() {
    let transport = RecordingTransport::new();
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    pipeline.record(
        EventType::ButtonClicked,
        json!({
            "userId": 999,
            "type": "forged",
            "rewriteCount": 77,
            "aiEnabled": false,
            "noteText": "secret note",
            "button": "analyze"
        }),
    );
    pipeline.flush().await;

    let entries = transport.accepted_entries();
    assert_eq!(entries[0]["userId"], json!(pipeline.user_id()));
    assert_eq!(entries[0]["type"], json!("button_clicked"));
    assert_eq!(entries[0]["rewriteCount"], json!(0));
    assert_eq!(entries[0]["aiEnabled"], json!(true));
    assert_eq!(entries[0]["button"], json!("analyze"));
    assert!(entries[0].get("noteText").is_none());
}

#[tokio::test]
async fn test_corrupt_state_file_keeps_pipeline_working() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("state.json");
    std::fs::write(&path, "{broken").unwrap();

    let transport = RecordingTransport::new();
    let pipeline =
        Pipeline::new(quiet_config(), FileStore::open_or_memory(&path), transport.clone()).unwrap();

    assert_eq!(pipeline.rewrite(), 1);
    assert!(pipeline.flush().await.is_delivered());
    assert_eq!(transport.accepted_entries()[0]["rewriteCount"], json!(1));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{broken");
}

// ============================================================================
// ORDERING & RETRY
// ============================================================================

#[tokio::test]
async fn test_order_preserved_across_failures() {
    let transport = RecordingTransport::scripted(&[false, false, true]);
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    let mut seq = 0;
    let mut record = |n: usize| {
        for _ in 0..n {
            pipeline.record(EventType::ButtonClicked, json!({"seq": seq}));
            seq += 1;
        }
    };

    record(5);
    assert!(matches!(pipeline.flush().await, FlushOutcome::Failed { requeued: 5, .. }));
    record(3);
    assert!(matches!(pipeline.flush().await, FlushOutcome::Failed { requeued: 8, .. }));
    record(2);
    assert!(pipeline.flush().await.is_delivered());

    let delivered: Vec<Value> = field_values(&transport.accepted_entries(), "seq");
    let expected: Vec<Value> = (0..10).map(|n| json!(n)).collect();
    assert_eq!(delivered, expected);
    assert_eq!(transport.attempts(), 3);
    assert_eq!(pipeline.stats().failed_attempts, 2);
    assert_eq!(pipeline.stats().delivered, 10);
}

#[tokio::test]
async fn test_no_loss_after_single_failure() {
    let transport = RecordingTransport::scripted(&[false]);
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    for n in 0..4 {
        pipeline.record(EventType::ButtonClicked, json!({"seq": n}));
    }
    let at_failure = pipeline.pending();
    pipeline.flush().await;
    assert_eq!(pipeline.pending(), at_failure);

    pipeline.flush().await;
    let delivered = field_values(&transport.accepted_entries(), "seq");
    for n in 0..4 {
        assert!(delivered.contains(&json!(n)));
    }
}

#[tokio::test]
async fn test_failed_batch_is_requeued_before_collapsing() {
    let transport = RecordingTransport::scripted(&[false]);
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    pipeline.record(EventType::HelpClicked, json!({"seq": 1}));
    pipeline.record(EventType::HelpClicked, json!({"seq": 2}));

    assert!(matches!(pipeline.flush().await, FlushOutcome::Failed { requeued: 2, .. }));
    assert_eq!(pipeline.queue_len(), 2);

    assert_eq!(
        pipeline.flush().await,
        FlushOutcome::Delivered {
            sent: 1,
            collapsed: 1,
            dropped: 0
        }
    );
    assert_eq!(field_values(&transport.accepted_entries(), "seq"), vec![json!(2)]);
}

#[tokio::test]
async fn test_collapsed_burst_still_carries_baseline_fields() {
    let transport = RecordingTransport::new();
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    pipeline.record(EventType::HelpClicked, Value::Null);
    pipeline.record(EventType::HelpClicked, Value::Null);
    assert!(matches!(
        pipeline.flush().await,
        FlushOutcome::Delivered { sent: 1, collapsed: 1, .. }
    ));

    pipeline.record(EventType::ButtonClicked, json!({"button": "analyze"}));
    pipeline.flush().await;

    let entries = transport.accepted_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["type"], json!("help_clicked"));
    assert_eq!(entries[0]["rewriteCount"], json!(0));
    assert_eq!(entries[0]["resetCount"], json!(0));
    assert_eq!(entries[0]["aiEnabled"], json!(true));
    assert!(entries[1].get("rewriteCount").is_none());
    assert!(entries[1].get("aiEnabled").is_none());
}

#[tokio::test]
async fn test_entries_recorded_during_attempt_stay_queued() {
    let transport = GatedTransport::new();
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());
    let pipeline = Arc::new(pipeline);

    pipeline.record(EventType::ButtonClicked, json!({"seq": 0}));
    pipeline.record(EventType::ButtonClicked, json!({"seq": 1}));

    let flusher = Arc::clone(&pipeline);
    let attempt = tokio::spawn(async move { flusher.flush().await });
    transport.entered.notified().await;

    pipeline.record(EventType::ButtonClicked, json!({"seq": 2}));
    assert_eq!(pipeline.flush().await, FlushOutcome::Skipped(SkipReason::InFlight));

    transport.release.notify_one();
    assert!(attempt.await.unwrap().is_delivered());
    assert_eq!(pipeline.queue_len(), 1);

    transport.release.notify_one();
    assert!(pipeline.flush().await.is_delivered());

    let batches = transport.accepted();
    assert_eq!(field_values(&batches[0], "seq"), vec![json!(0), json!(1)]);
    assert_eq!(field_values(&batches[1], "seq"), vec![json!(2)]);
}

#[test]
fn test_concurrent_rewrites_keep_counter_order() {
    let transport = RecordingTransport::new();
    let (pipeline, _store) = pipeline_with(quiet_config(), transport.clone());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    pipeline.rewrite();
                }
            });
        }
    });

    let entries: Vec<Value> = pipeline
        .pending()
        .iter()
        .map(|e| serde_json::to_value(e).unwrap())
        .collect();
    let counts = field_values(&entries, "rewriteCount");
    let expected: Vec<Value> = (1..=200).map(|n| json!(n)).collect();
    assert_eq!(counts, expected);
}

// ============================================================================
// TRIGGERS
// ============================================================================

#[tokio::test]
async fn test_size_threshold_triggers_flush() {
    let transport = RecordingTransport::new();
    let pipeline = Pipeline::launch(
        quiet_config(),
        Arc::new(MemoryStore::new()),
        transport.clone(),
    )
    .unwrap();

    for n in 0..20 {
        pipeline.record(EventType::ButtonClicked, json!({"seq": n}));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.attempts(), 0);

    pipeline.record(EventType::ButtonClicked, json!({"seq": 20}));
    let flushed = wait_until(|| transport.attempts() >= 1, Duration::from_secs(2)).await;
    assert!(flushed, "21st entry should trigger a flush without the timer");
    assert_eq!(transport.accepted()[0].len(), 21);
    assert!(wait_until(|| pipeline.queue_len() == 0, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_timer_triggers_flush() {
    let transport = RecordingTransport::new();
    let config = PipelineConfig {
        flush_interval: Duration::from_millis(50),
        ..quiet_config()
    };
    let pipeline = Pipeline::launch(config, Arc::new(MemoryStore::new()), transport.clone()).unwrap();
    assert!(pipeline.is_scheduler_running());

    pipeline.rewrite();
    let flushed = wait_until(|| transport.attempts() >= 1, Duration::from_secs(2)).await;
    assert!(flushed);
    assert!(wait_until(|| pipeline.queue_len() == 0, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_manual_flush_restarts_timer() {
    let transport = RecordingTransport::new();
    let config = PipelineConfig {
        flush_interval: Duration::from_millis(600),
        ..quiet_config()
    };
    let pipeline = Pipeline::launch(config, Arc::new(MemoryStore::new()), transport.clone()).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    pipeline.rewrite();
    assert!(pipeline.flush().await.is_delivered());
    pipeline.rewrite();

    // The first tick at ~600 ms is pushed back to ~900 ms
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(transport.attempts(), 1);
    assert_eq!(pipeline.queue_len(), 1);

    let flushed = wait_until(|| transport.attempts() >= 2, Duration::from_secs(2)).await;
    assert!(flushed);
}

#[tokio::test]
async fn test_shutdown_flushes_pending_entries() {
    let transport = RecordingTransport::new();
    let pipeline =
        Pipeline::launch(quiet_config(), Arc::new(MemoryStore::new()), transport.clone()).unwrap();

    pipeline.rewrite();
    pipeline.reset();
    pipeline.record(EventType::UploadClicked, Value::Null);

    let outcome = pipeline.shutdown().await;
    assert!(matches!(outcome, Some(FlushOutcome::Delivered { sent: 3, .. })));
    assert!(!pipeline.is_scheduler_running());
    assert_eq!(pipeline.queue_len(), 0);
}

#[tokio::test]
async fn test_shutdown_wait_is_bounded() {
    let transport = GatedTransport::new();
    let config = PipelineConfig {
        shutdown_grace: Duration::from_millis(100),
        ..quiet_config()
    };
    let pipeline = Pipeline::launch(config, Arc::new(MemoryStore::new()), transport.clone()).unwrap();
    pipeline.rewrite();

    let started = Instant::now();
    let outcome = pipeline.shutdown().await;
    assert_eq!(outcome, None);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(transport.accepted().is_empty());
}

#[tokio::test]
async fn test_disabled_pipeline_records_nothing() {
    let transport = RecordingTransport::new();
    let config = PipelineConfig {
        enabled: false,
        ..quiet_config()
    };
    let pipeline = Pipeline::launch(config, Arc::new(MemoryStore::new()), transport.clone()).unwrap();

    assert!(pipeline.record(EventType::ButtonClicked, Value::Null).is_none());
    assert_eq!(pipeline.rewrite(), 1);
    assert_eq!(pipeline.queue_len(), 0);
    assert_eq!(pipeline.flush().await, FlushOutcome::Skipped(SkipReason::Empty));
}
