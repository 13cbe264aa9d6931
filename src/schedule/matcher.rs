//! Minute-granularity matching of schedules against a wall-clock instant.
//!
//! Every function here is pure: `now` is always passed in, never read from
//! the system clock. A schedule fires in at most one one-minute window per
//! day, and only when the hour and minute are *equal*, never "on or after".

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};

use super::Schedule;

/// Weekday index of `now`, 0 = Sunday.
pub fn weekday_index(now: &NaiveDateTime) -> u8 {
    // num_days_from_sunday is always 0..=6
    now.weekday().num_days_from_sunday() as u8
}

/// Weekday filter: schedules without repeat days apply every day.
pub fn applies_on(schedule: &Schedule, now: &NaiveDateTime) -> bool {
    schedule.repeat_days.is_empty() || schedule.repeat_days.contains(&weekday_index(now))
}

fn same_minute(a: &NaiveDateTime, b: &NaiveDateTime) -> bool {
    a.hour() == b.hour() && a.minute() == b.minute()
}

/// Instant of the warning, `warning_minutes` before the trigger. Uses
/// calendar arithmetic so a 00:03 trigger with a 5 minute warning lands on
/// 23:58 of the previous day.
pub fn warning_time(schedule: &Schedule) -> Option<NaiveDateTime> {
    if schedule.warning_minutes == 0 {
        return None;
    }
    schedule
        .trigger_time
        .checked_sub_signed(Duration::minutes(i64::from(schedule.warning_minutes)))
}

/// The schedule's trigger minute is `now`'s minute on an applicable day.
pub fn is_trigger_due(schedule: &Schedule, now: &NaiveDateTime) -> bool {
    applies_on(schedule, now) && same_minute(&schedule.trigger_time, now)
}

/// The warning minute is `now`'s minute on an applicable day.
///
/// The weekday filter is applied to `now`, matching how the trigger is
/// filtered; a warning that wraps past midnight is therefore announced on
/// the weekday it is shown, not the weekday of the trigger.
pub fn is_warning_due(schedule: &Schedule, now: &NaiveDateTime) -> bool {
    match warning_time(schedule) {
        Some(warn_at) => applies_on(schedule, now) && same_minute(&warn_at, now),
        None => false,
    }
}

/// `at` with seconds and sub-seconds cleared.
pub fn minute_start(at: &NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(*at)
}

/// A one-time, non-repeating schedule whose anchor minute lies before the
/// minute of `reference`. The current minute never counts as expired, so a
/// schedule can still fire in it. Recurring schedules never expire.
pub fn is_expired_one_time(schedule: &Schedule, reference: &NaiveDateTime) -> bool {
    schedule.deletes_after_firing()
        && minute_start(&schedule.trigger_time) < minute_start(reference)
}
