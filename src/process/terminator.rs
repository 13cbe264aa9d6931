//! `sysinfo`-backed process terminator.
//!
//! Graceful termination sends SIGTERM and polls the process table at a short
//! fixed interval until the grace period runs out, then escalates to SIGKILL.
//! Polling sleeps the calling task only. Full process-table scans run on the
//! blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ProcessControl, ProcessError};
use crate::config::TerminationConfig;

/// Terminates processes found in the live process table.
pub struct ProcessTerminator {
    system: Arc<Mutex<System>>,
    poll_interval: Duration,
    force_confirm_timeout: Duration,
}

impl ProcessTerminator {
    pub fn new(config: &TerminationConfig) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            force_confirm_timeout: Duration::from_millis(config.force_confirm_ms),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        lock_table(&self.system)
    }

    /// Pids of every live process matching `app_id`, excluding ourselves.
    async fn find(&self, app_id: &str) -> Result<Vec<Pid>, ProcessError> {
        let system = Arc::clone(&self.system);
        let target = app_id.to_string();
        tokio::task::spawn_blocking(move || scan(&system, &target))
            .await
            .map_err(|e| {
                warn!(app = %app_id, error = %e, "process table scan did not complete");
                ProcessError::LookupFailed {
                    app_id: app_id.to_string(),
                }
            })
    }

    /// Subset of `pids` that is still alive.
    fn alive(&self, pids: &[Pid]) -> Vec<Pid> {
        let mut system = self.system();
        system.refresh_processes(ProcessesToUpdate::Some(pids), true);
        pids.iter()
            .copied()
            .filter(|pid| system.process(*pid).map(is_live).unwrap_or(false))
            .collect()
    }

    /// Deliver `signal` to each pid. Platforms without SIGTERM fall back to
    /// a kill. A rejected signal only counts when its target is still alive
    /// afterwards; it may simply have exited between refresh and signal.
    fn signal(&self, app_id: &str, pids: &[Pid], signal: Signal) -> Result<(), ProcessError> {
        let rejected: Vec<Pid> = {
            let system = self.system();
            pids.iter()
                .copied()
                .filter(|pid| match system.process(*pid) {
                    Some(process) => !match signal {
                        Signal::Kill => process.kill(),
                        other => process.kill_with(other).unwrap_or_else(|| process.kill()),
                    },
                    None => false,
                })
                .collect()
        };

        match self.alive(&rejected).first() {
            Some(pid) => Err(ProcessError::SignalRejected {
                app_id: app_id.to_string(),
                pid: pid.as_u32(),
            }),
            None => Ok(()),
        }
    }

    /// Poll until every pid is gone or `timeout` elapses; returns survivors.
    async fn wait_for_exit(&self, pids: &[Pid], timeout: Duration) -> Vec<Pid> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = self.alive(pids);
            if remaining.is_empty() || Instant::now() >= deadline {
                return remaining;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn kill_and_confirm(&self, app_id: &str, pids: &[Pid]) -> Result<(), ProcessError> {
        self.signal(app_id, pids, Signal::Kill)?;
        let survivors = self.wait_for_exit(pids, self.force_confirm_timeout).await;
        if survivors.is_empty() {
            info!(app = %app_id, count = pids.len(), "force quit");
            Ok(())
        } else {
            warn!(app = %app_id, remaining = survivors.len(), "processes survived SIGKILL");
            Err(ProcessError::StillAlive {
                app_id: app_id.to_string(),
                remaining: survivors.len(),
            })
        }
    }
}

#[async_trait::async_trait]
impl ProcessControl for ProcessTerminator {
    async fn is_running(&self, app_id: &str) -> bool {
        matches!(self.find(app_id).await, Ok(pids) if !pids.is_empty())
    }

    async fn terminate(&self, app_id: &str, timeout: Duration) -> Result<(), ProcessError> {
        let pids = self.find(app_id).await?;
        if pids.is_empty() {
            debug!(app = %app_id, "not running");
            return Err(ProcessError::NotRunning {
                app_id: app_id.to_string(),
            });
        }

        self.signal(app_id, &pids, Signal::Term)?;
        let survivors = self.wait_for_exit(&pids, timeout).await;
        if survivors.is_empty() {
            info!(app = %app_id, count = pids.len(), "quit gracefully");
            return Ok(());
        }

        debug!(
            app = %app_id,
            remaining = survivors.len(),
            timeout_ms = timeout.as_millis() as u64,
            "graceful quit timed out, escalating"
        );
        self.kill_and_confirm(app_id, &survivors).await
    }

    async fn force_terminate(&self, app_id: &str) -> Result<(), ProcessError> {
        let pids = self.find(app_id).await?;
        if pids.is_empty() {
            debug!(app = %app_id, "not running");
            return Err(ProcessError::NotRunning {
                app_id: app_id.to_string(),
            });
        }
        self.kill_and_confirm(app_id, &pids).await
    }
}

fn lock_table(system: &Mutex<System>) -> MutexGuard<'_, System> {
    // A panic while refreshing leaves no partial state worth discarding.
    system.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Refresh the whole table and return the sorted pids matching `app_id`.
fn scan(system: &Mutex<System>, app_id: &str) -> Vec<Pid> {
    let own = sysinfo::get_current_pid().ok();
    let mut system = lock_table(system);
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut pids: Vec<Pid> = system
        .processes()
        .iter()
        .filter(|(pid, process)| Some(**pid) != own && is_live(process))
        .filter(|(_, process)| {
            process_matches(&process.name().to_string_lossy(), process.exe(), app_id)
        })
        .map(|(pid, _)| *pid)
        .collect();
    pids.sort_unstable();
    pids
}

/// Zombies have already exited and only await reaping by their parent.
/// Threads listed alongside processes on Linux are never targets.
fn is_live(process: &Process) -> bool {
    process.thread_kind().is_none()
        && !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// An app id names a process by its process name, its full executable path,
/// or the file name of its executable.
pub fn process_matches(name: &str, exe: Option<&Path>, app_id: &str) -> bool {
    if app_id.is_empty() {
        return false;
    }
    if name == app_id {
        return true;
    }
    match exe {
        Some(exe) => {
            exe == Path::new(app_id)
                || exe
                    .file_name()
                    .map(|file| file.to_string_lossy() == app_id)
                    .unwrap_or(false)
        }
        None => false,
    }
}
