//! Periodic reconciliation poll.
//!
//! Spawns nothing itself: callers run [`run_reconciliation`] in a task.
//! Every `interval` it fetches the server's active-job listing and hands
//! it to [`JobTracker::reconcile`], catching streams that died silently,
//! jobs that vanished from the server and jobs started elsewhere. Runs
//! on a fixed `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::tracker::JobTracker;

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Run the reconciliation loop until `cancel` is triggered.
///
/// The first poll happens one full `interval` after start. A failed poll
/// is logged and retried on the next tick.
pub async fn run_reconciliation(
    tracker: Arc<JobTracker>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Job reconciliation started"
    );

    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job reconciliation stopping");
                break;
            }
            _ = ticker.tick() => {
                match tracker.poll_once().await {
                    Ok(report) if report.is_empty() => {
                        tracing::debug!("Job reconciliation: nothing to do");
                    }
                    Ok(report) => {
                        tracing::info!(
                            adopted = ?report.adopted,
                            resynced = ?report.resynced,
                            retired = ?report.retired,
                            "Job reconciliation: registry updated"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Job reconciliation: poll failed");
                    }
                }
            }
        }
    }
}
