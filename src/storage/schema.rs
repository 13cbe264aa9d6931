//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Current schema version recorded in `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            target_app_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            trigger_time TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            repeat_days TEXT NOT NULL DEFAULT '[]',
            warning_minutes INTEGER NOT NULL DEFAULT 5,
            is_one_time INTEGER NOT NULL DEFAULT 0,
            lock_screen INTEGER NOT NULL DEFAULT 0,
            shutdown_computer INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS quit_log (
            id INTEGER PRIMARY KEY,
            app_name TEXT NOT NULL,
            app_id TEXT NOT NULL,
            attempted_at TEXT NOT NULL,
            success INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS whitelist (
            app_id TEXT PRIMARY KEY,
            added_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            paused INTEGER NOT NULL DEFAULT 0,
            notifications INTEGER NOT NULL DEFAULT 1,
            revision INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO settings (id) VALUES (1);

        CREATE INDEX IF NOT EXISTS idx_quit_log_attempted ON quit_log(attempted_at);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["schedules", "quit_log", "whitelist"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table}");
        }

        let (paused, notifications, revision): (bool, bool, i64) = conn
            .query_row(
                "SELECT paused, notifications, revision FROM settings WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert!(!paused);
        assert!(notifications);
        assert_eq!(revision, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute("UPDATE settings SET paused = 1", []).unwrap();
        migrate(&conn).unwrap();

        let paused: bool = conn
            .query_row("SELECT paused FROM settings", [], |row| row.get(0))
            .unwrap();
        assert!(paused);

        let settings_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(settings_rows, 1);
    }
}
