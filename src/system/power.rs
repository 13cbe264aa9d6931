//! Privilege-gated system shutdown.
//!
//! The privilege check is local and conservative: the shutdown executable
//! must exist and the process must run as the superuser. No elevation is
//! ever attempted.

use std::path::Path;

use thiserror::Error;
use tracing::{error, warn};

use super::command::{run_fixed, CommandError, CommandOutput};

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("shutdown requires superuser privilege and {path}")]
    PrivilegeDenied { path: String },

    #[error("shutdown command failed: {0}")]
    Command(#[from] CommandError),
}

/// Running with an effective uid of 0.
#[cfg(unix)]
pub fn is_superuser() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_superuser() -> bool {
    false
}

/// The shutdown executable exists at `shutdown_path` and we are root.
pub fn has_shutdown_privilege(shutdown_path: &Path) -> bool {
    shutdown_path.is_file() && is_superuser()
}

/// Invoke `<shutdown_path> -h now <reason>`. Irreversible once it succeeds.
pub async fn request_shutdown(
    shutdown_path: &Path,
    reason: &str,
) -> Result<CommandOutput, PowerError> {
    let argv = vec![
        shutdown_path.to_string_lossy().to_string(),
        "-h".to_string(),
        "now".to_string(),
        reason.to_string(),
    ];
    warn!(path = %shutdown_path.display(), %reason, "requesting system shutdown");

    run_fixed(&argv).await.map_err(|e| {
        error!(error = %e, "shutdown command failed");
        PowerError::Command(e)
    })
}
