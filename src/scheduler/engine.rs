//! The scheduler loop: a periodic tick that runs evaluation passes.
//!
//! `start()` runs one pass immediately and then arms a timer whose first
//! tick is one interval later. `restart()` is `stop()` followed by `start()`,
//! so every change to the schedule set resets the tick phase and gets
//! evaluated right away. `stop()` only cancels future ticks; actions already
//! dispatched keep running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Evaluator, PassSummary};

/// Source of the local wall-clock time used for matching.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Local wall-clock time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the tick timer. Explicitly constructed; there is no global instance.
pub struct SchedulerLoop {
    evaluator: Arc<Evaluator>,
    period: Duration,
    clock: Clock,
    timer: Option<Timer>,
}

impl SchedulerLoop {
    pub fn new(evaluator: Arc<Evaluator>, period: Duration) -> Self {
        Self::with_clock(evaluator, period, Arc::new(local_now))
    }

    pub fn with_clock(evaluator: Arc<Evaluator>, period: Duration, clock: Clock) -> Self {
        Self {
            evaluator,
            period,
            clock,
            timer: None,
        }
    }

    pub fn state(&self) -> LoopState {
        match &self.timer {
            Some(timer) if !timer.handle.is_finished() => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    /// Cancel any existing timer, evaluate once now, then arm the tick.
    pub async fn start(&mut self) -> PassSummary {
        self.stop();

        let summary = self.evaluator.run_pass((self.clock)()).await;

        let first_tick = Instant::now() + self.period;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&self.evaluator),
            first_tick,
            self.period,
            Arc::clone(&self.clock),
            cancel.clone(),
        ));
        self.timer = Some(Timer { cancel, handle });
        info!(period_secs = self.period.as_secs(), "scheduler started");
        summary
    }

    /// Cancel future ticks. Idempotent; a pass already running completes.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
            debug!("scheduler stopped");
        }
    }

    pub async fn restart(&mut self) -> PassSummary {
        self.stop();
        self.start().await
    }

    /// Run until `shutdown` fires, restarting on every change published on
    /// `changes`. In-flight actions get up to `drain_timeout` to finish.
    pub async fn run(
        mut self,
        mut changes: watch::Receiver<u64>,
        shutdown: CancellationToken,
        drain_timeout: Duration,
    ) {
        self.start().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        debug!("change feed closed");
                        shutdown.cancelled().await;
                        break;
                    }
                    let revision = *changes.borrow_and_update();
                    info!(revision, "schedules or settings changed, restarting scheduler");
                    self.restart().await;
                }
            }
        }

        self.stop();
        self.evaluator.drain(drain_timeout).await;
        info!("scheduler shut down");
    }
}

impl Drop for SchedulerLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ticks at `first_tick` and every `period` after it.
async fn tick_loop(
    evaluator: Arc<Evaluator>,
    first_tick: Instant,
    period: Duration,
    clock: Clock,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let summary = evaluator.run_pass(clock()).await;
                if !summary.triggered.is_empty() || !summary.warned.is_empty() {
                    debug!(
                        triggered = summary.triggered.len(),
                        warned = summary.warned.len(),
                        "tick"
                    );
                }
            }
        }
    }
}
