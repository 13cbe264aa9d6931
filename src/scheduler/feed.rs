//! Change feed: polls a revision counter and publishes it when it moves.
//!
//! The store bumps its revision on every mutation, including ones made by a
//! separate CLI process, so polling is enough to notice edits.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poll `read` every `period` and send each new value on `tx` until `cancel`
/// fires or every receiver is gone. Read errors are logged and retried on
/// the next tick.
pub async fn poll_revisions<F>(
    read: F,
    period: Duration,
    tx: watch::Sender<u64>,
    cancel: CancellationToken,
) where
    F: Fn() -> Result<u64> + Send,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            _ = interval.tick() => match read() {
                Ok(revision) => {
                    let changed = tx.send_if_modified(|current| {
                        if *current == revision {
                            false
                        } else {
                            *current = revision;
                            true
                        }
                    });
                    if changed {
                        debug!(revision, "revision changed");
                    }
                }
                Err(e) => warn!(error = %e, "failed to read revision"),
            },
        }
    }
}
