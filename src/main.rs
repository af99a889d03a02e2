//! # Beacon Replay Entry Point
//!
//! Replays recorded dashboard interactions through the telemetry pipeline.
//!
//! Reads JSON lines from stdin, one interaction per line:
//!
//! ```text
//! {"type": "rewrite"}
//! {"type": "emotion_modified", "data": {"sentenceId": 2, "emotionDelta": [...]}}
//! ```
//!
//! Configuration comes from `BEACON_*` environment variables. Entries are
//! flushed on the usual timer and size triggers; EOF or Ctrl-C runs the
//! shutdown flush.

use beacon::storage::{FileStore, REWRITE_COUNT, RESET_COUNT};
use beacon::{EventType, Pipeline, PipelineConfig};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One replayed interaction.
#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=================================================");
    println!("  Beacon - Interaction Telemetry Replay          ");
    println!("=================================================");
    println!();

    let config = PipelineConfig::from_env()?;
    let store = FileStore::open_or_memory(&config.state_path);

    println!("Configuration:");
    println!("  - Collector: {}", config.endpoint());
    println!("  - Flush interval: {}s", config.flush_interval.as_secs());
    println!("  - Flush threshold: {} entries", config.flush_threshold);
    println!("  - Differential: {}", config.differential);
    println!("  - State file: {}", config.state_path.display());
    println!();

    let pipeline = Arc::new(Pipeline::with_http(config, store)?);
    pipeline.start();

    println!("✓ Pipeline started");
    println!("  - User: {}", pipeline.user_id());
    println!("  - Session: {}", pipeline.session().session_id);
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    let mut rejected = 0usize;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, flushing before exit...");
                break;
            }
        };
        let Some(line) = line else { break };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ReplayLine>(&line) {
            Ok(replay) => replay_line(&pipeline, replay),
            Err(e) => {
                eprintln!("✗ line {}: {}", line_no, e);
                rejected += 1;
            }
        }
    }

    let outcome = pipeline.shutdown().await;
    let stats = pipeline.stats();

    println!();
    println!("Replay Summary:");
    println!("  - Lines read: {}", line_no);
    println!("  - Lines rejected: {}", rejected);
    println!("  - Entries recorded: {}", stats.recorded);
    println!("  - Events suppressed: {}", stats.suppressed);
    println!("  - Entries delivered: {}", stats.delivered);
    println!("  - Entries collapsed: {}", stats.collapsed);
    println!("  - Failed attempts: {}", stats.failed_attempts);
    println!("  - Still pending: {}", stats.queue_len);
    println!("  - Final flush: {:?}", outcome);
    println!();

    println!("=================================================");
    println!("  Replay Finished");
    println!("=================================================");

    Ok(())
}

/// Route counter-bearing actions through their dedicated operations so
/// persisted counters move with the replay.
fn replay_line(pipeline: &Pipeline, replay: ReplayLine) {
    match EventType::from(replay.event_type) {
        EventType::Rewrite => {
            pipeline.rewrite();
        }
        EventType::Reset => {
            pipeline.reset();
        }
        EventType::AiToggle => {
            let enabled = replay
                .data
                .get("aiEnabled")
                .and_then(Value::as_bool)
                .unwrap_or(!pipeline.ai_enabled());
            pipeline.set_ai_enabled(enabled);
        }
        other => {
            pipeline.record(other, replay.data);
        }
    }
    log::debug!(
        "Counters now rewrite={} reset={}",
        pipeline.counters().get(REWRITE_COUNT),
        pipeline.counters().get(RESET_COUNT)
    );
}
