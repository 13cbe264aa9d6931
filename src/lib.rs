//! AutoQuit -- quit applications on a schedule.
//!
//! This crate provides the schedule evaluation engine, the process
//! terminator, session lock and shutdown actions, and the SQLite store the
//! daemon and CLI share.

pub mod config;
pub mod process;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod system;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use config::AutoQuitConfig;
use process::ProcessTerminator;
use schedule::{LogEntry, Schedule, ScheduleId};
use scheduler::{engine, feed, ActionExecutor, Collaborator, Evaluator, SchedulerLoop};
use storage::Store;
use system::{DesktopNotifier, SystemActions};

/// The store plus the desktop notifier, as seen by the scheduler.
pub struct StoreCollaborator {
    store: Store,
    notifier: DesktopNotifier,
}

impl StoreCollaborator {
    pub fn new(store: Store, notifier: DesktopNotifier) -> Self {
        Self { store, notifier }
    }
}

impl Collaborator for StoreCollaborator {
    fn schedules(&self) -> Result<Vec<Schedule>> {
        self.store.list_schedules()
    }

    fn is_paused(&self) -> Result<bool> {
        self.store.is_paused()
    }

    fn is_whitelisted(&self, app_id: &str) -> Result<bool> {
        self.store.is_whitelisted(app_id)
    }

    fn notifications_enabled(&self) -> Result<bool> {
        self.store.notifications_enabled()
    }

    fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        self.store.remove_schedule(id).map(|_| ())
    }

    fn append_log(&self, entry: LogEntry) -> Result<()> {
        self.store.append_log(&entry)
    }

    fn notify(&self, title: &str, body: &str) {
        self.notifier.notify(title, body);
    }
}

/// Start the AutoQuit daemon: change feed and scheduler loop. Runs until
/// SIGINT or SIGTERM.
pub async fn run_daemon(config: AutoQuitConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = &config.storage.db_path;
    info!(db = %db_path.display(), "initializing database");
    let store = Store::open(db_path, config.history.retention)?;

    // Stale one-time schedules are reported, not deleted.
    match store.has_expired(&engine::local_now()) {
        Ok(true) => warn!(
            "one-time schedules dated in the past will fire again at their clock time; \
             run `autoquit purge-expired` to remove them"
        ),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not check for past one-time schedules"),
    }

    // 2. Wire the scheduler
    let collaborator = Arc::new(StoreCollaborator::new(
        store.clone(),
        DesktopNotifier::new(config.notifications.desktop),
    ));
    let tracker = TaskTracker::new();
    let executor = Arc::new(ActionExecutor::new(
        collaborator.clone(),
        Arc::new(ProcessTerminator::new(&config.termination)),
        Arc::new(SystemActions::new(&config.lock, &config.power)),
        tracker.clone(),
    ));
    let evaluator = Arc::new(Evaluator::new(collaborator, executor, tracker));
    let scheduler = SchedulerLoop::new(
        evaluator,
        Duration::from_secs(config.scheduler.tick_interval_secs.max(1)),
    );

    // 3. Change feed (background task)
    let shutdown = CancellationToken::new();
    let (changes_tx, changes_rx) = watch::channel(store.revision()?);
    let feed_store = store.clone();
    let feed = tokio::spawn(feed::poll_revisions(
        move || feed_store.revision(),
        Duration::from_secs(config.scheduler.change_poll_secs.max(1)),
        changes_tx,
        shutdown.clone(),
    ));

    // 4. Signals
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "failed to listen for shutdown signals");
        }
        signal_token.cancel();
    });

    info!("AutoQuit daemon running");
    scheduler
        .run(
            changes_rx,
            shutdown.clone(),
            Duration::from_secs(config.scheduler.drain_timeout_secs),
        )
        .await;

    shutdown.cancel();
    feed.await.context("change feed task panicked")?;
    info!("AutoQuit daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = term.recv() => {}
    }
    info!("shutdown signal received");
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::{FakeProcesses, FakeSession};
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::TempDir;

    fn at(d: u32, h: u32, m: u32, sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, d)
            .unwrap()
            .and_hms_opt(h, m, sec)
            .unwrap()
    }

    fn evaluator_over(store: &Store) -> Evaluator {
        let collaborator = Arc::new(StoreCollaborator::new(
            store.clone(),
            DesktopNotifier::new(false),
        ));
        let tracker = TaskTracker::new();
        let executor = Arc::new(ActionExecutor::new(
            collaborator.clone(),
            Arc::new(FakeProcesses::new(true)),
            Arc::new(FakeSession::new(false)),
            tracker.clone(),
        ));
        Evaluator::new(collaborator, executor, tracker)
    }

    #[tokio::test]
    async fn test_one_time_schedule_fires_when_started_inside_its_minute() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("autoquit.db"), 100).unwrap();
        let mut s = Schedule::new("slack", "Slack", at(1, 9, 30, 0));
        s.is_one_time = true;
        store.add_schedule(&s).unwrap();

        let launch = at(1, 9, 30, 20);
        assert!(!store.has_expired(&launch).unwrap());
        assert_eq!(store.purge_expired(&launch).unwrap(), 0);

        let evaluator = evaluator_over(&store);
        let summary = evaluator.run_pass(launch).await;
        assert!(evaluator.drain(Duration::from_secs(1)).await);

        assert_eq!(summary.triggered, vec![s.id]);
        assert!(store.list_schedules().unwrap().is_empty());
        assert!(store.logs(10).unwrap()[0].success);
    }

    #[tokio::test]
    async fn test_unfired_one_time_schedule_survives_until_its_clock_time() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("autoquit.db"), 100).unwrap();
        let mut s = Schedule::new("slack", "Slack", at(1, 8, 0, 0));
        s.is_one_time = true;
        store.add_schedule(&s).unwrap();

        // Started at noon, after the anchor: nothing deletes it before it fires.
        let evaluator = evaluator_over(&store);
        let noon = evaluator.run_pass(at(1, 12, 0, 0)).await;
        assert!(noon.triggered.is_empty());
        assert_eq!(store.list_schedules().unwrap(), vec![s.clone()]);

        let next_morning = evaluator.run_pass(at(2, 8, 0, 5)).await;
        assert!(evaluator.drain(Duration::from_secs(1)).await);
        assert_eq!(next_morning.triggered, vec![s.id]);
        assert!(store.list_schedules().unwrap().is_empty());
    }

    #[test]
    fn test_store_collaborator_reads_and_writes_through() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("autoquit.db"), 100).unwrap();
        let collaborator = StoreCollaborator::new(store.clone(), DesktopNotifier::new(false));

        let trigger = NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let s = Schedule::new("slack", "Slack", trigger);
        store.add_schedule(&s).unwrap();
        store.add_to_whitelist("zoom").unwrap();

        assert_eq!(collaborator.schedules().unwrap(), vec![s.clone()]);
        assert!(collaborator.is_whitelisted("zoom").unwrap());
        assert!(!collaborator.is_paused().unwrap());
        assert!(collaborator.notifications_enabled().unwrap());

        collaborator
            .append_log(LogEntry::for_schedule(&s, true))
            .unwrap();
        collaborator.delete_schedule(s.id).unwrap();
        // Deleting twice is not an error.
        collaborator.delete_schedule(s.id).unwrap();

        assert!(store.list_schedules().unwrap().is_empty());
        assert_eq!(store.logs(10).unwrap()[0].app_id, "slack");
    }
}
