//! Process lookup and termination by stable app identifier.

pub mod terminator;

use std::time::Duration;

use thiserror::Error;

pub use terminator::ProcessTerminator;

/// Default grace period before a graceful quit escalates to a forced kill.
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("no running process matches '{app_id}'")]
    NotRunning { app_id: String },

    #[error("signal to pid {pid} ({app_id}) was rejected")]
    SignalRejected { app_id: String, pid: u32 },

    #[error("{remaining} process(es) of '{app_id}' still alive after forced termination")]
    StillAlive { app_id: String, remaining: usize },

    #[error("process table lookup for '{app_id}' did not complete")]
    LookupFailed { app_id: String },
}

/// OS-facing termination primitives.
///
/// `Ok(())` means every matching process is confirmed gone by the end of
/// the call. Failures are reported, never retried.
#[async_trait::async_trait]
pub trait ProcessControl: Send + Sync {
    /// At least one process matches `app_id`.
    async fn is_running(&self, app_id: &str) -> bool;

    /// Ask politely, wait up to `timeout`, then force.
    async fn terminate(&self, app_id: &str, timeout: Duration) -> Result<(), ProcessError>;

    /// Kill immediately.
    async fn force_terminate(&self, app_id: &str) -> Result<(), ProcessError>;
}
