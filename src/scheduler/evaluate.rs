//! One evaluation pass: read the collaborator's state, decide what is due,
//! dispatch it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{ActionExecutor, Collaborator};
use crate::schedule::{matcher, ScheduleId};

/// What fired for a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FireKind {
    Trigger,
    Warning,
}

/// Outcome of one pass, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub paused: bool,
    /// Enabled, non-whitelisted schedules examined.
    pub evaluated: usize,
    pub triggered: Vec<ScheduleId>,
    pub warned: Vec<ScheduleId>,
}

/// Evaluates schedules and dispatches due actions onto a task tracker.
///
/// Outlives scheduler restarts, so its record of what already fired in the
/// current minute keeps a restart from firing the same schedule twice.
pub struct Evaluator {
    collaborator: Arc<dyn Collaborator>,
    executor: Arc<ActionExecutor>,
    tracker: TaskTracker,
    fired: Mutex<HashMap<(ScheduleId, FireKind), NaiveDateTime>>,
    pass_lock: tokio::sync::Mutex<()>,
    passes: AtomicU64,
}

impl Evaluator {
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        executor: Arc<ActionExecutor>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            collaborator,
            executor,
            tracker,
            fired: Mutex::new(HashMap::new()),
            pass_lock: tokio::sync::Mutex::new(()),
            passes: AtomicU64::new(0),
        }
    }

    /// Passes completed so far, paused ones included.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Record that `id` fired `kind` in `minute`; false if it already had.
    fn claim(&self, id: ScheduleId, kind: FireKind, minute: NaiveDateTime) -> bool {
        let mut fired = self.fired.lock().unwrap_or_else(|p| p.into_inner());
        fired.retain(|_, at| *at == minute);
        fired.insert((id, kind), minute) != Some(minute)
    }

    /// Evaluate every schedule against `now`. Passes never overlap: a pass
    /// started while another is running waits for it to finish.
    pub async fn run_pass(&self, now: NaiveDateTime) -> PassSummary {
        let _guard = self.pass_lock.lock().await;
        let summary = self.evaluate(now);
        self.passes.fetch_add(1, Ordering::SeqCst);
        summary
    }

    fn evaluate(&self, now: NaiveDateTime) -> PassSummary {
        let mut summary = PassSummary::default();

        match self.collaborator.is_paused() {
            Ok(true) => {
                debug!("paused, skipping pass");
                summary.paused = true;
                return summary;
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "failed to read pause flag, skipping pass");
                return summary;
            }
        }

        // Snapshot: executing a schedule may delete it from the live set.
        let schedules = match self.collaborator.schedules() {
            Ok(list) => list,
            Err(e) => {
                error!(error = %e, "failed to read schedules, skipping pass");
                return summary;
            }
        };

        let minute = matcher::minute_start(&now);

        for schedule in schedules.into_iter().filter(|s| s.enabled) {
            match self.collaborator.is_whitelisted(&schedule.target_app_id) {
                Ok(false) => {}
                Ok(true) => {
                    debug!(schedule = %schedule.id, app = %schedule.target_app_id, "whitelisted");
                    continue;
                }
                Err(e) => {
                    warn!(schedule = %schedule.id, error = %e, "whitelist unreadable, skipping schedule");
                    continue;
                }
            }
            summary.evaluated += 1;

            if matcher::is_trigger_due(&schedule, &now)
                && self.claim(schedule.id, FireKind::Trigger, minute)
            {
                info!(schedule = %schedule.id, app = %schedule.target_app_id, "schedule due");
                summary.triggered.push(schedule.id);
                let executor = Arc::clone(&self.executor);
                let due = schedule.clone();
                self.tracker.spawn(async move {
                    executor.execute(&due).await;
                });
            }

            if schedule.warning_minutes > 0
                && matcher::is_warning_due(&schedule, &now)
                && self.claim(schedule.id, FireKind::Warning, minute)
            {
                summary.warned.push(schedule.id);
                self.executor.warn(&schedule);
            }
        }

        summary
    }

    /// Close the tracker and wait up to `timeout` for in-flight actions.
    /// Returns false if some were still running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        if !finished {
            warn!(pending = self.tracker.len(), "in-flight actions still running at shutdown");
        }
        finished
    }
}
