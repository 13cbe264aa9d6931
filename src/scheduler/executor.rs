//! Consequences of a due schedule: quit, log, notify, lock, shut down,
//! delete.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::Collaborator;
use crate::process::ProcessControl;
use crate::schedule::{LogEntry, Schedule, ScheduleId};
use crate::system::{PowerError, SessionActions};

/// What happened to a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    NotRequested,
    /// The target could not be quit, so the host was left running.
    CancelledQuitFailed,
    PermissionDenied,
    Invoked,
    Failed,
}

/// Record of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub schedule_id: ScheduleId,
    pub terminated: bool,
    pub lock_dispatched: bool,
    pub shutdown: ShutdownOutcome,
    pub deleted: bool,
}

pub struct ActionExecutor {
    collaborator: Arc<dyn Collaborator>,
    processes: Arc<dyn ProcessControl>,
    session: Arc<dyn SessionActions>,
    tracker: TaskTracker,
}

impl ActionExecutor {
    /// `tracker` receives the fire-and-forget lock tasks.
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        processes: Arc<dyn ProcessControl>,
        session: Arc<dyn SessionActions>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            collaborator,
            processes,
            session,
            tracker,
        }
    }

    fn notifications_enabled(&self) -> bool {
        self.collaborator.notifications_enabled().unwrap_or_else(|e| {
            warn!(error = %e, "could not read notification setting, assuming enabled");
            true
        })
    }

    /// Run the full quit sequence for one due trigger. No step aborts the
    /// caller; every failure is logged or notified here.
    pub async fn execute(&self, schedule: &Schedule) -> ExecutionReport {
        let name = schedule.display_name.as_str();
        let app_id = schedule.target_app_id.as_str();

        // 1. Quit.
        let terminated = match self.processes.force_terminate(app_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(schedule = %schedule.id, app = %app_id, error = %e, "quit failed");
                false
            }
        };

        // 2. Log the attempt.
        if let Err(e) = self
            .collaborator
            .append_log(LogEntry::for_schedule(schedule, terminated))
        {
            error!(schedule = %schedule.id, error = %e, "failed to append quit log");
        }

        // 3. Report it.
        if self.notifications_enabled() {
            if terminated {
                self.collaborator
                    .notify("App Quit", &format!("{name} has been force quit."));
            } else {
                self.collaborator
                    .notify("Quit Failed", &format!("Failed to quit {name}."));
            }
        }

        // 4. Lock, off the critical path.
        let lock_dispatched = schedule.lock_screen;
        if lock_dispatched {
            let session = Arc::clone(&self.session);
            self.tracker.spawn(async move {
                session.lock_screen().await;
            });
        }

        // 5. Shut down, only after a successful quit.
        let shutdown = if schedule.shutdown_computer {
            self.shutdown_after(schedule, terminated).await
        } else {
            ShutdownOutcome::NotRequested
        };

        // 6. One-time schedules are spent.
        let deleted = if schedule.deletes_after_firing() {
            match self.collaborator.delete_schedule(schedule.id) {
                Ok(()) => {
                    info!(schedule = %schedule.id, "deleted one-time schedule");
                    true
                }
                Err(e) => {
                    error!(schedule = %schedule.id, error = %e, "failed to delete one-time schedule");
                    false
                }
            }
        } else {
            false
        };

        info!(
            schedule = %schedule.id,
            app = %app_id,
            terminated,
            lock = lock_dispatched,
            shutdown = ?shutdown,
            deleted,
            "schedule executed"
        );

        ExecutionReport {
            schedule_id: schedule.id,
            terminated,
            lock_dispatched,
            shutdown,
            deleted,
        }
    }

    async fn shutdown_after(&self, schedule: &Schedule, terminated: bool) -> ShutdownOutcome {
        let name = schedule.display_name.as_str();

        if !terminated {
            warn!(schedule = %schedule.id, "shutdown cancelled, quit did not succeed");
            self.collaborator.notify(
                "Shutdown Cancelled",
                &format!("{name} could not be quit, so the computer was not shut down."),
            );
            return ShutdownOutcome::CancelledQuitFailed;
        }

        if !self.session.has_shutdown_privilege() {
            warn!(schedule = %schedule.id, "shutdown requested without privilege");
            self.collaborator.notify(
                "Shutdown Needs Permission",
                "AutoQuit must run as root to shut down the computer.",
            );
            return ShutdownOutcome::PermissionDenied;
        }

        let reason = format!("AutoQuit: scheduled shutdown after quitting {name}");
        match self.session.request_shutdown(&reason).await {
            Ok(out) => {
                info!(schedule = %schedule.id, output = %out.output, "shutdown initiated");
                self.collaborator
                    .notify("Shutting Down", &format!("Shutting down after quitting {name}."));
                ShutdownOutcome::Invoked
            }
            Err(PowerError::PrivilegeDenied { .. }) => {
                self.collaborator.notify(
                    "Shutdown Needs Permission",
                    "AutoQuit must run as root to shut down the computer.",
                );
                ShutdownOutcome::PermissionDenied
            }
            Err(e) => {
                error!(schedule = %schedule.id, error = %e, "shutdown failed");
                self.collaborator
                    .notify("Shutdown Failed", &format!("Could not shut down: {e}"));
                ShutdownOutcome::Failed
            }
        }
    }

    /// Announce an upcoming quit. No termination, logging or deletion.
    pub fn warn(&self, schedule: &Schedule) {
        if !self.notifications_enabled() {
            return;
        }
        info!(schedule = %schedule.id, minutes = schedule.warning_minutes, "quit warning");
        self.collaborator.notify(
            "App Quit Warning",
            &format!(
                "{} will be force quit in {} minute(s).",
                schedule.display_name, schedule.warning_minutes
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::{schedule_at, FakeCollaborator, FakeProcesses, FakeSession};

    struct Harness {
        collaborator: Arc<FakeCollaborator>,
        processes: Arc<FakeProcesses>,
        session: Arc<FakeSession>,
        tracker: TaskTracker,
        executor: ActionExecutor,
    }

    fn harness(quit_ok: bool, privileged: bool) -> Harness {
        let collaborator = Arc::new(FakeCollaborator::default());
        let processes = Arc::new(FakeProcesses::new(quit_ok));
        let session = Arc::new(FakeSession::new(privileged));
        let tracker = TaskTracker::new();
        let executor = ActionExecutor::new(
            collaborator.clone(),
            processes.clone(),
            session.clone(),
            tracker.clone(),
        );
        Harness {
            collaborator,
            processes,
            session,
            tracker,
            executor,
        }
    }

    impl Harness {
        async fn settle(&self) {
            self.tracker.close();
            self.tracker.wait().await;
        }
    }

    #[tokio::test]
    async fn test_successful_quit_logs_and_notifies() {
        let h = harness(true, false);
        let s = schedule_at("slack", 9, 30);

        let report = h.executor.execute(&s).await;

        assert!(report.terminated);
        assert_eq!(report.shutdown, ShutdownOutcome::NotRequested);
        assert!(!report.lock_dispatched);
        assert!(!report.deleted);
        assert_eq!(h.processes.forced(), vec!["slack".to_string()]);

        let logs = h.collaborator.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].app_id, "slack");
        assert!(logs[0].success);

        let sent = h.collaborator.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "App Quit");
    }

    #[tokio::test]
    async fn test_failed_quit_is_logged_not_fatal() {
        let h = harness(false, true);
        let s = schedule_at("slack", 9, 30);

        let report = h.executor.execute(&s).await;

        assert!(!report.terminated);
        assert!(!h.collaborator.logs()[0].success);
        assert_eq!(h.collaborator.notifications()[0].0, "Quit Failed");
    }

    #[tokio::test]
    async fn test_notifications_setting_silences_quit_result() {
        let h = harness(true, false);
        h.collaborator.set_notifications(false);
        h.executor.execute(&schedule_at("slack", 9, 30)).await;
        assert!(h.collaborator.notifications().is_empty());
        assert_eq!(h.collaborator.logs().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_is_dispatched_in_background() {
        let h = harness(false, false);
        let mut s = schedule_at("slack", 9, 30);
        s.lock_screen = true;

        let report = h.executor.execute(&s).await;
        h.settle().await;

        // Locking does not depend on the quit result.
        assert!(report.lock_dispatched);
        assert_eq!(h.session.lock_calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_never_runs_after_failed_quit() {
        for privileged in [false, true] {
            for lock in [false, true] {
                let h = harness(false, privileged);
                let mut s = schedule_at("slack", 9, 30);
                s.shutdown_computer = true;
                s.lock_screen = lock;

                let report = h.executor.execute(&s).await;
                h.settle().await;

                assert_eq!(report.shutdown, ShutdownOutcome::CancelledQuitFailed);
                assert_eq!(h.session.shutdown_calls(), 0);
                assert!(h
                    .collaborator
                    .notifications()
                    .iter()
                    .any(|(title, _)| title == "Shutdown Cancelled"));
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_never_runs_without_privilege() {
        for lock in [false, true] {
            let h = harness(true, false);
            let mut s = schedule_at("slack", 9, 30);
            s.shutdown_computer = true;
            s.lock_screen = lock;

            let report = h.executor.execute(&s).await;
            h.settle().await;

            assert_eq!(report.shutdown, ShutdownOutcome::PermissionDenied);
            assert_eq!(h.session.shutdown_calls(), 0);
            assert!(h
                .collaborator
                .notifications()
                .iter()
                .any(|(title, _)| title == "Shutdown Needs Permission"));
        }
    }

    #[tokio::test]
    async fn test_shutdown_notice_ignores_notification_setting() {
        let h = harness(true, false);
        h.collaborator.set_notifications(false);
        let mut s = schedule_at("slack", 9, 30);
        s.shutdown_computer = true;

        h.executor.execute(&s).await;

        let titles: Vec<String> = h.collaborator.notifications().into_iter().map(|n| n.0).collect();
        assert_eq!(titles, vec!["Shutdown Needs Permission".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_runs_after_quit_with_privilege() {
        let h = harness(true, true);
        let mut s = schedule_at("slack", 9, 30);
        s.shutdown_computer = true;

        let report = h.executor.execute(&s).await;

        assert_eq!(report.shutdown, ShutdownOutcome::Invoked);
        assert_eq!(h.session.shutdown_calls(), 1);
        assert!(h.session.last_reason().unwrap().contains("Slack"));
    }

    #[tokio::test]
    async fn test_shutdown_command_failure_is_reported() {
        let h = harness(true, true);
        h.session.fail_shutdown();
        let mut s = schedule_at("slack", 9, 30);
        s.shutdown_computer = true;

        let report = h.executor.execute(&s).await;

        assert_eq!(report.shutdown, ShutdownOutcome::Failed);
        assert!(h
            .collaborator
            .notifications()
            .iter()
            .any(|(title, _)| title == "Shutdown Failed"));
    }

    #[tokio::test]
    async fn test_one_time_schedule_is_deleted_even_when_quit_fails() {
        let h = harness(false, false);
        let mut s = schedule_at("slack", 9, 30);
        s.is_one_time = true;
        h.collaborator.set_schedules(vec![s.clone()]);

        let report = h.executor.execute(&s).await;

        assert!(report.deleted);
        assert_eq!(h.collaborator.deleted(), vec![s.id]);
        assert!(h.collaborator.schedules().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_time_with_weekdays_is_kept() {
        let h = harness(true, false);
        let mut s = schedule_at("slack", 9, 30);
        s.is_one_time = true;
        s.repeat_days.insert(2);

        let report = h.executor.execute(&s).await;

        assert!(!report.deleted);
        assert!(h.collaborator.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_warning_only_notifies() {
        let h = harness(true, false);
        let s = schedule_at("slack", 9, 30);

        h.executor.warn(&s);

        assert!(h.processes.forced().is_empty());
        assert!(h.collaborator.logs().is_empty());
        let sent = h.collaborator.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "App Quit Warning");
        assert_eq!(sent[0].1, "Slack will be force quit in 5 minute(s).");
    }
}
