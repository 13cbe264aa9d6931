//! Desktop notifications through a fixed helper command.
//!
//! Delivery is fire-and-forget: the helper runs on the current Tokio
//! runtime and its failures are only logged. Without a runtime, or with
//! desktop delivery disabled, notifications go to the log alone.

use tracing::{debug, info};

use super::command::run_fixed;

/// Sends user-visible notifications.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    desktop: bool,
}

impl DesktopNotifier {
    pub fn new(desktop: bool) -> Self {
        Self { desktop }
    }

    pub fn notify(&self, title: &str, body: &str) {
        info!(%title, %body, "notification");
        if !self.desktop {
            return;
        }

        let argv = notification_argv(title, body);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = run_fixed(&argv).await {
                        debug!(error = %e, "desktop notification not delivered");
                    }
                });
            }
            Err(_) => debug!("no async runtime, notification logged only"),
        }
    }
}

#[cfg(target_os = "macos")]
fn notification_argv(title: &str, body: &str) -> Vec<String> {
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        applescript_escape(body),
        applescript_escape(title)
    );
    vec!["osascript".to_string(), "-e".to_string(), script]
}

#[cfg(not(target_os = "macos"))]
fn notification_argv(title: &str, body: &str) -> Vec<String> {
    vec![
        "notify-send".to_string(),
        "--app-name=AutoQuit".to_string(),
        "--".to_string(),
        title.to_string(),
        body.to_string(),
    ]
}

/// Escape a value for use inside an AppleScript string literal.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
