//! Host-facing side effects: external commands, session lock, shutdown and
//! desktop notifications.

pub mod command;
pub mod lock;
pub mod notify;
pub mod power;

use std::path::PathBuf;

use crate::config::{LockConfig, PowerConfig};

pub use command::{CommandError, CommandOutput};
pub use lock::LockOutcome;
pub use notify::DesktopNotifier;
pub use power::PowerError;

/// Lock and power actions as seen by the action executor.
#[async_trait::async_trait]
pub trait SessionActions: Send + Sync {
    /// Best effort; never fails the caller.
    async fn lock_screen(&self) -> LockOutcome;

    fn has_shutdown_privilege(&self) -> bool;

    /// Shut the host down now. `Ok` iff the command exited with status 0.
    async fn request_shutdown(&self, reason: &str) -> Result<CommandOutput, PowerError>;
}

/// Real lock and power actions, driven by configuration.
#[derive(Debug, Clone)]
pub struct SystemActions {
    lock: LockConfig,
    shutdown_path: PathBuf,
}

impl SystemActions {
    pub fn new(lock: &LockConfig, power: &PowerConfig) -> Self {
        Self {
            lock: lock.clone(),
            shutdown_path: power.shutdown_path.clone(),
        }
    }
}

#[async_trait::async_trait]
impl SessionActions for SystemActions {
    async fn lock_screen(&self) -> LockOutcome {
        lock::lock_session(&self.lock).await
    }

    fn has_shutdown_privilege(&self) -> bool {
        power::has_shutdown_privilege(&self.shutdown_path)
    }

    async fn request_shutdown(&self, reason: &str) -> Result<CommandOutput, PowerError> {
        if !self.has_shutdown_privilege() {
            return Err(PowerError::PrivilegeDenied {
                path: self.shutdown_path.display().to_string(),
            });
        }
        power::request_shutdown(&self.shutdown_path, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_refused_without_privilege() {
        let actions = SystemActions::new(
            &LockConfig::default(),
            &PowerConfig {
                shutdown_path: PathBuf::from("/nonexistent/shutdown"),
            },
        );
        assert!(!actions.has_shutdown_privilege());
        let result = actions.request_shutdown("test").await;
        assert!(matches!(result, Err(PowerError::PrivilegeDenied { .. })));
    }
}
