//! Schedule records, quit-log entries and the pure time matching rules.

pub mod matcher;

use std::collections::BTreeSet;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque schedule identifier, stable across edits.
pub type ScheduleId = Uuid;

/// Highest valid weekday index (0 = Sunday .. 6 = Saturday).
pub const MAX_WEEKDAY: u8 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("weekday index {0} is out of range 0..=6")]
    InvalidWeekday(u8),

    #[error("target app id must not be empty")]
    EmptyAppId,

    #[error("'{0}' is not a weekday index")]
    UnparsableWeekday(String),

    #[error("invalid time '{input}': expected {expected}")]
    InvalidTime { input: String, expected: &'static str },
}

/// A time-of-day rule that quits one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    /// Process name, executable path or executable file name of the target.
    pub target_app_id: String,
    pub display_name: String,
    /// Local wall-clock time. Matching only looks at hour and minute; the
    /// date anchors one-time schedules for expiry.
    pub trigger_time: NaiveDateTime,
    pub enabled: bool,
    /// Weekday indices, 0 = Sunday.
    pub repeat_days: BTreeSet<u8>,
    pub warning_minutes: u32,
    pub is_one_time: bool,
    pub lock_screen: bool,
    pub shutdown_computer: bool,
}

impl Schedule {
    /// New enabled, non-repeating schedule with a five minute warning.
    pub fn new(target_app_id: &str, display_name: &str, trigger_time: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_app_id: target_app_id.to_string(),
            display_name: display_name.to_string(),
            trigger_time,
            enabled: true,
            repeat_days: BTreeSet::new(),
            warning_minutes: 5,
            is_one_time: false,
            lock_screen: false,
            shutdown_computer: false,
        }
    }

    /// Reject records that break the model invariants.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.target_app_id.trim().is_empty() {
            return Err(ScheduleError::EmptyAppId);
        }
        if let Some(day) = self.repeat_days.iter().find(|d| **d > MAX_WEEKDAY) {
            return Err(ScheduleError::InvalidWeekday(*day));
        }
        Ok(())
    }

    /// Weekday filter is active.
    pub fn is_repeating(&self) -> bool {
        !self.repeat_days.is_empty()
    }

    /// One-time schedules are deleted after firing unless they repeat on
    /// specific weekdays, in which case the one-time flag is ignored.
    pub fn deletes_after_firing(&self) -> bool {
        self.is_one_time && !self.is_repeating()
    }
}

/// Parse a comma separated weekday list such as `"1,2,3,4,5"`.
pub fn parse_weekdays(input: &str) -> Result<BTreeSet<u8>, ScheduleError> {
    let mut days = BTreeSet::new();
    for part in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let day = part
            .parse::<u8>()
            .map_err(|_| ScheduleError::UnparsableWeekday(part.to_string()))?;
        if day > MAX_WEEKDAY {
            return Err(ScheduleError::InvalidWeekday(day));
        }
        days.insert(day);
    }
    Ok(days)
}

/// Build a trigger time from `HH:MM` and an optional `YYYY-MM-DD` anchor
/// date. Without a date the anchor is `today`.
pub fn parse_trigger(
    time: &str,
    date: Option<&str>,
    today: NaiveDate,
) -> Result<NaiveDateTime, ScheduleError> {
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| {
        ScheduleError::InvalidTime {
            input: time.to_string(),
            expected: "HH:MM",
        }
    })?;
    let date = match date {
        Some(d) => NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").map_err(|_| {
            ScheduleError::InvalidTime {
                input: d.to_string(),
                expected: "YYYY-MM-DD",
            }
        })?,
        None => today,
    };
    Ok(date.and_time(time))
}

/// One quit attempt, as recorded by the action executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub app_name: String,
    pub app_id: String,
    pub attempted_at: NaiveDateTime,
    pub success: bool,
}

impl LogEntry {
    /// Entry for `schedule`, stamped with the current local time.
    pub fn for_schedule(schedule: &Schedule, success: bool) -> Self {
        Self {
            app_name: schedule.display_name.clone(),
            app_id: schedule.target_app_id.clone(),
            attempted_at: Local::now().naive_local(),
            success,
        }
    }
}
