//! SQLite storage layer -- schedules, quit log, whitelist and settings.
//!
//! Every mutation bumps the `settings.revision` counter in the same
//! transaction, which is what the daemon's change feed polls.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::schedule::{matcher, LogEntry, Schedule, ScheduleId};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("opening database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Persistent state shared by the daemon and the CLI.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
    retention: usize,
}

impl Store {
    /// Open the database at `path`, keeping at most `retention` log entries.
    pub fn open(path: &Path, retention: usize) -> Result<Self> {
        let pool = open_pool(path)?;
        info!(db = %path.display(), "database ready");
        Ok(Self { pool, retention })
    }

    // ----- Schedules -----

    /// All schedules in insertion order.
    pub fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_app_id, display_name, trigger_time, enabled, repeat_days,
                    warning_minutes, is_one_time, lock_screen, shutdown_computer
             FROM schedules ORDER BY rowid",
        )?;
        let rows: Vec<ScheduleRow> = stmt
            .query_map([], ScheduleRow::from_row)?
            .collect::<Result<_, _>>()?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    pub fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, target_app_id, display_name, trigger_time, enabled, repeat_days,
                        warning_minutes, is_one_time, lock_screen, shutdown_computer
                 FROM schedules WHERE id = ?1",
                [id.to_string()],
                ScheduleRow::from_row,
            )
            .optional()?;
        row.map(ScheduleRow::into_schedule).transpose()
    }

    /// Insert a validated schedule.
    pub fn add_schedule(&self, schedule: &Schedule) -> Result<()> {
        schedule.validate()?;
        let repeat_days = serde_json::to_string(&schedule.repeat_days)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO schedules (id, target_app_id, display_name, trigger_time, enabled,
                                    repeat_days, warning_minutes, is_one_time, lock_screen,
                                    shutdown_computer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                schedule.id.to_string(),
                schedule.target_app_id,
                schedule.display_name,
                schedule.trigger_time.format(TIME_FORMAT).to_string(),
                schedule.enabled,
                repeat_days,
                schedule.warning_minutes,
                schedule.is_one_time,
                schedule.lock_screen,
                schedule.shutdown_computer,
            ],
        )?;
        bump_revision(&tx)?;
        tx.commit()?;

        info!(schedule = %schedule.id, app = %schedule.target_app_id, "schedule added");
        Ok(())
    }

    /// Overwrite every field of an existing schedule, keeping its id and
    /// position. Returns false if it did not exist.
    pub fn update_schedule(&self, schedule: &Schedule) -> Result<bool> {
        schedule.validate()?;
        let repeat_days = serde_json::to_string(&schedule.repeat_days)?;

        let updated = self.mutate(|tx| {
            Ok(tx.execute(
                "UPDATE schedules SET target_app_id = ?2, display_name = ?3, trigger_time = ?4,
                                      enabled = ?5, repeat_days = ?6, warning_minutes = ?7,
                                      is_one_time = ?8, lock_screen = ?9, shutdown_computer = ?10
                 WHERE id = ?1",
                params![
                    schedule.id.to_string(),
                    schedule.target_app_id,
                    schedule.display_name,
                    schedule.trigger_time.format(TIME_FORMAT).to_string(),
                    schedule.enabled,
                    repeat_days,
                    schedule.warning_minutes,
                    schedule.is_one_time,
                    schedule.lock_screen,
                    schedule.shutdown_computer,
                ],
            )? > 0)
        })?;
        if updated {
            info!(schedule = %schedule.id, app = %schedule.target_app_id, "schedule updated");
        }
        Ok(updated)
    }

    /// Delete a schedule. Returns false if it did not exist.
    pub fn remove_schedule(&self, id: ScheduleId) -> Result<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM schedules WHERE id = ?1", [id.to_string()])? > 0;
        if removed {
            bump_revision(&tx)?;
        }
        tx.commit()?;
        if removed {
            info!(schedule = %id, "schedule removed");
        }
        Ok(removed)
    }

    /// Enable or disable a schedule. Returns false if it did not exist.
    pub fn set_enabled(&self, id: ScheduleId, enabled: bool) -> Result<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE schedules SET enabled = ?2 WHERE id = ?1",
            params![id.to_string(), enabled],
        )? > 0;
        if updated {
            bump_revision(&tx)?;
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Whether any one-time schedule anchored before `reference` remains.
    pub fn has_expired(&self, reference: &NaiveDateTime) -> Result<bool> {
        Ok(self
            .list_schedules()?
            .iter()
            .any(|s| matcher::is_expired_one_time(s, reference)))
    }

    /// Delete one-time schedules anchored before `reference`. Returns how
    /// many were removed.
    pub fn purge_expired(&self, reference: &NaiveDateTime) -> Result<usize> {
        let expired: Vec<ScheduleId> = self
            .list_schedules()?
            .into_iter()
            .filter(|s| matcher::is_expired_one_time(s, reference))
            .map(|s| s.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for id in &expired {
            removed += tx.execute("DELETE FROM schedules WHERE id = ?1", [id.to_string()])?;
        }
        bump_revision(&tx)?;
        tx.commit()?;

        info!(removed, "purged expired one-time schedules");
        Ok(removed)
    }

    // ----- Whitelist -----

    pub fn whitelist(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT app_id FROM whitelist ORDER BY app_id")?;
        let apps = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(apps)
    }

    pub fn is_whitelisted(&self, app_id: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let found = conn
            .query_row("SELECT 1 FROM whitelist WHERE app_id = ?1", [app_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns false if the app was already whitelisted.
    pub fn add_to_whitelist(&self, app_id: &str) -> Result<bool> {
        self.mutate(|tx| {
            Ok(tx.execute("INSERT OR IGNORE INTO whitelist (app_id) VALUES (?1)", [app_id])? > 0)
        })
    }

    /// Returns false if the app was not whitelisted.
    pub fn remove_from_whitelist(&self, app_id: &str) -> Result<bool> {
        self.mutate(|tx| Ok(tx.execute("DELETE FROM whitelist WHERE app_id = ?1", [app_id])? > 0))
    }

    // ----- Settings -----

    pub fn is_paused(&self) -> Result<bool> {
        self.setting("paused")
    }

    pub fn set_paused(&self, paused: bool) -> Result<()> {
        self.mutate(|tx| {
            tx.execute("UPDATE settings SET paused = ?1 WHERE id = 1", [paused])?;
            Ok(true)
        })?;
        info!(paused, "pause flag updated");
        Ok(())
    }

    pub fn notifications_enabled(&self) -> Result<bool> {
        self.setting("notifications")
    }

    pub fn set_notifications(&self, enabled: bool) -> Result<()> {
        self.mutate(|tx| {
            tx.execute("UPDATE settings SET notifications = ?1 WHERE id = 1", [enabled])?;
            Ok(true)
        })?;
        info!(enabled, "notification setting updated");
        Ok(())
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let revision: i64 =
            conn.query_row("SELECT revision FROM settings WHERE id = 1", [], |row| row.get(0))?;
        Ok(u64::try_from(revision).unwrap_or_default())
    }

    fn setting(&self, column: &'static str) -> Result<bool> {
        let conn = self.pool.get()?;
        let value = conn.query_row(
            &format!("SELECT {column} FROM settings WHERE id = 1"),
            [],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    // ----- Quit log -----

    /// Append an entry and prune the log down to the retention limit.
    pub fn append_log(&self, entry: &LogEntry) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO quit_log (app_name, app_id, attempted_at, success)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.app_name,
                entry.app_id,
                entry.attempted_at.format(TIME_FORMAT).to_string(),
                entry.success,
            ],
        )?;
        let pruned = tx.execute(
            "DELETE FROM quit_log WHERE id NOT IN
                (SELECT id FROM quit_log ORDER BY id DESC LIMIT ?1)",
            [self.retention as i64],
        )?;
        tx.commit()?;

        if pruned > 0 {
            debug!(pruned, "quit log pruned");
        }
        Ok(())
    }

    /// Most recent entries first.
    pub fn logs(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT app_name, app_id, attempted_at, success
             FROM quit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows: Vec<(String, String, String, bool)> = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|(app_name, app_id, attempted_at, success)| {
                Ok(LogEntry {
                    app_name,
                    app_id,
                    attempted_at: parse_time(&attempted_at)?,
                    success,
                })
            })
            .collect()
    }

    /// Returns how many entries were removed.
    pub fn clear_logs(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        Ok(conn.execute("DELETE FROM quit_log", [])?)
    }

    /// Run `op` in a transaction, bumping the revision when it reports a
    /// change.
    fn mutate<F>(&self, op: F) -> Result<bool>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<bool>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let changed = op(&tx)?;
        if changed {
            bump_revision(&tx)?;
        }
        tx.commit()?;
        Ok(changed)
    }
}

fn bump_revision(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE settings SET revision = revision + 1 WHERE id = 1", [])?;
    Ok(())
}

fn parse_time(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .with_context(|| format!("malformed timestamp '{raw}'"))
}

/// Raw column values, converted outside the row callback so malformed data
/// surfaces as a contextual error rather than a rusqlite conversion failure.
struct ScheduleRow {
    id: String,
    target_app_id: String,
    display_name: String,
    trigger_time: String,
    enabled: bool,
    repeat_days: String,
    warning_minutes: u32,
    is_one_time: bool,
    lock_screen: bool,
    shutdown_computer: bool,
}

impl ScheduleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            target_app_id: row.get(1)?,
            display_name: row.get(2)?,
            trigger_time: row.get(3)?,
            enabled: row.get(4)?,
            repeat_days: row.get(5)?,
            warning_minutes: row.get(6)?,
            is_one_time: row.get(7)?,
            lock_screen: row.get(8)?,
            shutdown_computer: row.get(9)?,
        })
    }

    fn into_schedule(self) -> Result<Schedule> {
        let id = Uuid::parse_str(&self.id)
            .with_context(|| format!("malformed schedule id '{}'", self.id))?;
        let repeat_days = serde_json::from_str(&self.repeat_days)
            .with_context(|| format!("malformed repeat days for schedule {id}"))?;
        Ok(Schedule {
            id,
            target_app_id: self.target_app_id,
            display_name: self.display_name,
            trigger_time: parse_time(&self.trigger_time)?,
            enabled: self.enabled,
            repeat_days,
            warning_minutes: self.warning_minutes,
            is_one_time: self.is_one_time,
            lock_screen: self.lock_screen,
            shutdown_computer: self.shutdown_computer,
        })
    }
}
