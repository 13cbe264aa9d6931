//! In-memory fakes for scheduler tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};

use super::Collaborator;
use crate::process::{ProcessControl, ProcessError};
use crate::schedule::{LogEntry, Schedule, ScheduleId};
use crate::system::{CommandError, CommandOutput, LockOutcome, PowerError, SessionActions};

pub fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
}

/// Daily schedule anchored on 2024-02-01 with a five minute warning. The
/// display name is the app id with its first letter capitalised.
pub fn schedule_at(app_id: &str, hour: u32, minute: u32) -> Schedule {
    let mut chars = app_id.chars();
    let display: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    Schedule::new(app_id, &display, dt(2024, 2, 1, hour, minute))
}

#[derive(Default)]
struct CollaboratorState {
    schedules: Vec<Schedule>,
    paused: bool,
    whitelist: HashSet<String>,
    notifications_off: bool,
    logs: Vec<LogEntry>,
    sent: Vec<(String, String)>,
    deleted: Vec<ScheduleId>,
    fail_reads: bool,
}

#[derive(Default)]
pub struct FakeCollaborator {
    state: Mutex<CollaboratorState>,
}

impl FakeCollaborator {
    pub fn set_schedules(&self, schedules: Vec<Schedule>) {
        self.state.lock().unwrap().schedules = schedules;
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().unwrap().paused = paused;
    }

    pub fn whitelist(&self, app_id: &str) {
        self.state.lock().unwrap().whitelist.insert(app_id.to_string());
    }

    pub fn set_notifications(&self, enabled: bool) {
        self.state.lock().unwrap().notifications_off = !enabled;
    }

    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.state.lock().unwrap().logs.clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn deleted(&self) -> Vec<ScheduleId> {
        self.state.lock().unwrap().deleted.clone()
    }
}

impl Collaborator for FakeCollaborator {
    fn schedules(&self) -> Result<Vec<Schedule>> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            anyhow::bail!("store unavailable");
        }
        Ok(state.schedules.clone())
    }

    fn is_paused(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().paused)
    }

    fn is_whitelisted(&self, app_id: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().whitelist.contains(app_id))
    }

    fn notifications_enabled(&self) -> Result<bool> {
        Ok(!self.state.lock().unwrap().notifications_off)
    }

    fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.schedules.retain(|s| s.id != id);
        state.deleted.push(id);
        Ok(())
    }

    fn append_log(&self, entry: LogEntry) -> Result<()> {
        self.state.lock().unwrap().logs.push(entry);
        Ok(())
    }

    fn notify(&self, title: &str, body: &str) {
        self.state
            .lock()
            .unwrap()
            .sent
            .push((title.to_string(), body.to_string()));
    }
}

pub struct FakeProcesses {
    quit_ok: bool,
    forced: Mutex<Vec<String>>,
}

impl FakeProcesses {
    pub fn new(quit_ok: bool) -> Self {
        Self {
            quit_ok,
            forced: Mutex::new(Vec::new()),
        }
    }

    pub fn forced(&self) -> Vec<String> {
        self.forced.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProcessControl for FakeProcesses {
    async fn is_running(&self, _app_id: &str) -> bool {
        self.quit_ok
    }

    async fn terminate(&self, app_id: &str, _timeout: Duration) -> Result<(), ProcessError> {
        self.force_terminate(app_id).await
    }

    async fn force_terminate(&self, app_id: &str) -> Result<(), ProcessError> {
        self.forced.lock().unwrap().push(app_id.to_string());
        if self.quit_ok {
            Ok(())
        } else {
            Err(ProcessError::NotRunning {
                app_id: app_id.to_string(),
            })
        }
    }
}

pub struct FakeSession {
    privileged: bool,
    shutdown_fails: AtomicBool,
    locks: AtomicUsize,
    shutdowns: AtomicUsize,
    reason: Mutex<Option<String>>,
}

impl FakeSession {
    pub fn new(privileged: bool) -> Self {
        Self {
            privileged,
            shutdown_fails: AtomicBool::new(false),
            locks: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            reason: Mutex::new(None),
        }
    }

    pub fn fail_shutdown(&self) {
        self.shutdown_fails.store(true, Ordering::SeqCst);
    }

    pub fn lock_calls(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn last_reason(&self) -> Option<String> {
        self.reason.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SessionActions for FakeSession {
    async fn lock_screen(&self) -> LockOutcome {
        self.locks.fetch_add(1, Ordering::SeqCst);
        LockOutcome::Primary
    }

    fn has_shutdown_privilege(&self) -> bool {
        self.privileged
    }

    async fn request_shutdown(&self, reason: &str) -> Result<CommandOutput, PowerError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        *self.reason.lock().unwrap() = Some(reason.to_string());
        if self.shutdown_fails.load(Ordering::SeqCst) {
            return Err(PowerError::Command(CommandError::NonZeroExit {
                program: "shutdown".to_string(),
                status: "exit status: 1".to_string(),
                output: "not permitted".to_string(),
            }));
        }
        Ok(CommandOutput {
            program: "shutdown".to_string(),
            output: String::new(),
        })
    }
}
