//! Flush scheduler - background task deciding when to deliver.
//!
//! Three triggers start a flush attempt:
//!
//! 1. **Timer**: a fixed interval elapsed since the last attempt (30 s by
//!    default). Size-triggered and manual attempts restart the interval.
//! 2. **Size**: the queue grew beyond its flush threshold. The queue wakes the
//!    scheduler directly, so bursts are shipped without waiting for the timer.
//! 3. **Shutdown**: [`FlushScheduler::shutdown`] stops the periodic task and
//!    makes one final attempt bounded by the shutdown grace period.
//!
//! A trigger that fires while an attempt is outstanding is a no-op; the next
//! natural trigger picks up whatever was queued in the meantime.

use super::service::{FlushOutcome, FlushService, SkipReason};
use crate::config::PipelineConfig;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Pause between checks while the shutdown flush waits for an in-flight attempt.
const IN_FLIGHT_POLL: Duration = Duration::from_millis(25);

/// Configuration for the flush scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between timer-triggered flushes
    pub flush_interval: Duration,
    /// Upper bound on the final flush at shutdown
    pub shutdown_grace: Duration,
    /// Whether the periodic task runs at all
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            enabled: true,
        }
    }
}

impl From<&PipelineConfig> for SchedulerConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            flush_interval: config.flush_interval,
            shutdown_grace: config.shutdown_grace,
            enabled: config.enabled,
        }
    }
}

/// What woke the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Size,
}

/// Drives [`FlushService`] from a timer and from queue pressure.
pub struct FlushScheduler {
    service: Arc<FlushService>,
    /// Fired by the queue when it crosses the flush threshold
    pressure: Arc<Notify>,
    config: SchedulerConfig,
    /// Running periodic task
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// Creates a new flush scheduler.
    ///
    /// # Arguments
    /// - `service`: flush service performing the actual attempts
    /// - `pressure`: notifier the queue fires when it crosses its threshold
    /// - `config`: interval, shutdown grace and enabled state
    ///
    /// # Returns
    /// An idle scheduler; nothing runs until [`FlushScheduler::spawn`].
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::collections::HashSet;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use beacon::flush::{FlushScheduler, FlushService, SchedulerConfig};
    /// use beacon::{BatchOptimizer, EventQueue, HttpTransport};
    ///
    /// let queue = Arc::new(EventQueue::new(20));
    /// let transport = Arc::new(HttpTransport::new(
    ///     "http://localhost:5000/log-interaction",
    ///     Duration::from_secs(10),
    /// )?);
    /// let optimizer = BatchOptimizer::new(Duration::from_millis(500), HashSet::new());
    /// let service = Arc::new(FlushService::new(queue.clone(), optimizer, transport, None));
    /// let scheduler = Arc::new(FlushScheduler::new(
    ///     service,
    ///     queue.pressure(),
    ///     SchedulerConfig::default(),
    /// ));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(service: Arc<FlushService>, pressure: Arc<Notify>, config: SchedulerConfig) -> Self {
        Self {
            service,
            pressure,
            config,
            task: Mutex::new(None),
        }
    }

    /// Spawn the periodic task on the current tokio runtime.
    ///
    /// Calling this while the task is already running has no effect.
    pub fn spawn(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        let scheduler = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            scheduler.run().await;
        }));
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Periodic loop. Runs until the task is aborted.
    ///
    /// If the scheduler is disabled in config, this method returns immediately.
    /// Otherwise it:
    /// 1. Waits for the timer or the queue's size notification
    /// 2. Defers a timer tick when another attempt started within the interval
    /// 3. Makes one flush attempt and logs its outcome
    /// 4. Repeats until aborted
    ///
    /// # Example
    /// ```rust,no_run
    /// # use std::sync::Arc;
    /// # fn demo(scheduler: Arc<beacon::FlushScheduler>) {
    /// let task = tokio::spawn(scheduler.clone().run());
    /// // ...
    /// task.abort();
    /// # }
    /// ```
    pub async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Telemetry flush scheduler is disabled, skipping");
            return;
        }

        info!(
            "Starting flush scheduler with {}-second interval",
            self.config.flush_interval.as_secs()
        );

        let period = self.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Start of the last attempt this loop already accounted for
        let mut accounted = self.service.last_attempt_started();

        loop {
            let trigger = tokio::select! {
                _ = ticker.tick() => Trigger::Timer,
                _ = self.pressure.notified() => Trigger::Size,
            };

            if trigger == Trigger::Timer {
                if let Some(deadline) = self.deferred_tick(accounted, period) {
                    debug!("Attempt made outside the timer, next tick deferred");
                    ticker.reset_at(deadline);
                    accounted = self.service.last_attempt_started();
                    continue;
                }
            }

            let outcome = self.service.flush().await;
            accounted = self.service.last_attempt_started();
            if trigger == Trigger::Size {
                ticker.reset();
            }
            log_outcome(trigger, &outcome);
        }
    }

    /// New deadline when an attempt the loop did not make started less than
    /// one interval ago.
    fn deferred_tick(&self, accounted: Option<Instant>, period: Duration) -> Option<Instant> {
        let started = self.service.last_attempt_started()?;
        if Some(started) == accounted {
            return None;
        }
        let deadline = started + period;
        (deadline > Instant::now()).then_some(deadline)
    }

    /// Stop the periodic task without flushing.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Stop the periodic task and make one final, bounded flush attempt.
    ///
    /// Waits out an attempt already in flight, then flushes ignoring any
    /// retry backoff. The whole wait is bounded by `shutdown_grace`.
    ///
    /// # Returns
    /// The final outcome, or `None` when the grace period ran out before the
    /// attempt settled; whatever was in flight may or may not have landed.
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn demo(scheduler: std::sync::Arc<beacon::FlushScheduler>) {
    /// match scheduler.shutdown().await {
    ///     Some(outcome) => println!("Final flush: {:?}", outcome),
    ///     None => eprintln!("Final flush timed out"),
    /// }
    /// # }
    /// ```
    pub async fn shutdown(&self) -> Option<FlushOutcome> {
        self.stop();

        let service = Arc::clone(&self.service);
        let final_flush = async move {
            loop {
                match service.flush_now().await {
                    FlushOutcome::Skipped(SkipReason::InFlight) => {
                        tokio::time::sleep(IN_FLIGHT_POLL).await
                    }
                    outcome => return outcome,
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_grace, final_flush).await {
            Ok(outcome) => {
                info!("Shutdown flush finished: {:?}", outcome);
                Some(outcome)
            }
            Err(_) => {
                warn!(
                    "Shutdown flush did not settle within {:?}, pending entries may be lost",
                    self.config.shutdown_grace
                );
                None
            }
        }
    }
}

fn log_outcome(trigger: Trigger, outcome: &FlushOutcome) {
    match outcome {
        FlushOutcome::Skipped(reason) => debug!("{:?} flush skipped: {:?}", trigger, reason),
        FlushOutcome::Delivered { sent, .. } => debug!("{:?} flush delivered {} entries", trigger, sent),
        FlushOutcome::Failed { requeued, .. } => {
            debug!("{:?} flush failed, {} entries waiting", trigger, requeued)
        }
    }
}
