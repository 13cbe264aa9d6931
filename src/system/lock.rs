//! Best-effort session lock: primary command, then a fallback.

use tracing::{info, warn};

use super::command::run_fixed;
use crate::config::LockConfig;

/// Which command, if any, locked the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Primary,
    Fallback,
    Failed,
}

/// Try the primary lock command; on spawn failure or non-zero exit, try the
/// fallback. Failures are logged and swallowed.
pub async fn lock_session(config: &LockConfig) -> LockOutcome {
    match run_fixed(&config.primary).await {
        Ok(_) => {
            info!("session locked");
            return LockOutcome::Primary;
        }
        Err(e) => warn!(error = %e, "primary lock command failed, trying fallback"),
    }

    match run_fixed(&config.fallback).await {
        Ok(_) => {
            info!("session locked via fallback");
            LockOutcome::Fallback
        }
        Err(e) => {
            warn!(error = %e, "fallback lock command failed");
            LockOutcome::Failed
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(primary: &[&str], fallback: &[&str]) -> LockConfig {
        LockConfig {
            primary: primary.iter().map(|s| s.to_string()).collect(),
            fallback: fallback.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("fallback-ran");
        let cfg = config(
            &["true"],
            &["touch", marker.to_str().unwrap()],
        );
        assert_eq!(lock_session(&cfg).await, LockOutcome::Primary);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_falls_back_on_non_zero_exit() {
        let cfg = config(&["false"], &["true"]);
        assert_eq!(lock_session(&cfg).await, LockOutcome::Fallback);
    }

    #[tokio::test]
    async fn test_falls_back_on_missing_program() {
        let cfg = config(&["/nonexistent/lock"], &["true"]);
        assert_eq!(lock_session(&cfg).await, LockOutcome::Fallback);
    }

    #[tokio::test]
    async fn test_both_failing_is_swallowed() {
        let cfg = config(&["false"], &[]);
        assert_eq!(lock_session(&cfg).await, LockOutcome::Failed);
    }
}
