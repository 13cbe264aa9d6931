//! Schedule evaluation and action execution.
//!
//! [`SchedulerLoop`] drives a periodic tick, [`Evaluator`] decides what is due
//! on each pass, and [`ActionExecutor`] carries out the consequences. All
//! state they read (schedules, pause flag, whitelist, settings) belongs to a
//! [`Collaborator`] and is re-read at the start of every pass.

pub mod engine;
pub mod evaluate;
pub mod executor;
pub mod feed;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::Result;

use crate::schedule::{LogEntry, Schedule, ScheduleId};

pub use engine::{LoopState, SchedulerLoop};
pub use evaluate::{Evaluator, FireKind, PassSummary};
pub use executor::{ActionExecutor, ExecutionReport, ShutdownOutcome};

/// The state owner the scheduler reads from and reports back to.
///
/// Writes (`delete_schedule`, `append_log`) may be issued from background
/// tasks concurrently with other readers; implementations serialize them.
pub trait Collaborator: Send + Sync {
    /// Current schedule set, in display order.
    fn schedules(&self) -> Result<Vec<Schedule>>;

    fn is_paused(&self) -> Result<bool>;

    fn is_whitelisted(&self, app_id: &str) -> Result<bool>;

    fn notifications_enabled(&self) -> Result<bool>;

    /// Deleting an id that no longer exists is not an error.
    fn delete_schedule(&self, id: ScheduleId) -> Result<()>;

    fn append_log(&self, entry: LogEntry) -> Result<()>;

    /// Fire-and-forget user notification.
    fn notify(&self, title: &str, body: &str);
}
