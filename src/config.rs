//! TOML configuration for the AutoQuit daemon.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) is a valid configuration. The file is looked up via
//! `$AUTOQUIT_CONFIG`, then `/etc/autoquit/autoquit.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "AUTOQUIT_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/autoquit/autoquit.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoQuitConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub termination: TerminationConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AutoQuitConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try, in order: `$AUTOQUIT_CONFIG`, the system path, the defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "AUTOQUIT_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding schedules, the quit log, whitelist and settings.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/autoquit.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between evaluation passes.
    pub tick_interval_secs: u64,
    /// Seconds between checks of the store's revision counter.
    pub change_poll_secs: u64,
    /// Upper bound on waiting for in-flight actions at shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            change_poll_secs: 5,
            drain_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    /// Grace period of a graceful quit before it escalates to a kill.
    pub graceful_timeout_ms: u64,
    /// Interval between process-table polls while waiting for an exit.
    pub poll_interval_ms: u64,
    /// How long to wait for a killed process to disappear.
    pub force_confirm_ms: u64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            graceful_timeout_ms: crate::process::DEFAULT_GRACEFUL_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 100,
            force_confirm_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

/// Session lock commands, each an argv list (no shell).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub primary: Vec<String>,
    pub fallback: Vec<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        #[cfg(target_os = "macos")]
        let (primary, fallback) = (
            vec!["/usr/bin/pmset", "displaysleepnow"],
            vec![
                "/System/Library/CoreServices/Menu Extras/User.menu/Contents/Resources/CGSession",
                "-suspend",
            ],
        );
        #[cfg(not(target_os = "macos"))]
        let (primary, fallback) = (
            vec!["loginctl", "lock-session"],
            vec!["xdg-screensaver", "lock"],
        );

        Self {
            primary: primary.into_iter().map(String::from).collect(),
            fallback: fallback.into_iter().map(String::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Power
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Well-known path of the shutdown executable.
    pub shutdown_path: PathBuf,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            shutdown_path: PathBuf::from("/sbin/shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Deliver desktop notifications; when false they are only logged.
    pub desktop: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { desktop: true }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of most recent quit log entries kept.
    pub retention: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { retention: 100 }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// `"text"` or `"json"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = AutoQuitConfig::default();
        assert_eq!(cfg.scheduler.tick_interval_secs, 60);
        assert_eq!(cfg.termination.graceful_timeout_ms, 2_000);
        assert_eq!(cfg.history.retention, 100);
        assert_eq!(cfg.power.shutdown_path, PathBuf::from("/sbin/shutdown"));
        assert!(!cfg.lock.primary.is_empty());
        assert!(!cfg.lock.fallback.is_empty());
    }

    #[test]
    fn test_empty_toml_is_valid() {
        let cfg: AutoQuitConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.scheduler.change_poll_secs, 5);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let cfg: AutoQuitConfig = toml::from_str(
            r#"
            [scheduler]
            tick_interval_secs = 30

            [lock]
            primary = ["/usr/local/bin/lock-now"]

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scheduler.tick_interval_secs, 30);
        assert_eq!(cfg.scheduler.change_poll_secs, 5);
        assert_eq!(cfg.lock.primary, vec!["/usr/local/bin/lock-now".to_string()]);
        assert!(!cfg.lock.fallback.is_empty());
        assert_eq!(cfg.logging.format, "json");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoquit.toml");
        std::fs::write(&path, "[history]\nretention = 7\n").unwrap();
        let cfg = AutoQuitConfig::load(&path).unwrap();
        assert_eq!(cfg.history.retention, 7);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[scheduler\n").unwrap();
        assert!(AutoQuitConfig::load(&path).is_err());
    }
}
