//! Per-job state snapshot.

use opsdash_core::job_status::{progress_percentage, JobStatus};
use opsdash_core::types::JobId;
use serde::Serialize;

use crate::event::ProgressEvent;

/// Detail recorded when a job fails without the server saying why.
const MISSING_FAILURE_DETAIL: &str = "Job failed without error detail";

/// Client-side view of one tracked job.
///
/// Mutated only through [`Job::apply`]. `percentage` is always derived
/// from the progress counters, never taken from the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_current: Option<u64>,
    pub progress_total: Option<u64>,
    /// Completion percentage in `0.0..=100.0`.
    pub percentage: f64,
    /// Last message seen on the stream.
    pub message: Option<String>,
    /// Result payload. Only set when `status` is `completed`.
    pub result: Option<serde_json::Value>,
    /// Failure detail. Only set when `status` is `failed`.
    pub error_detail: Option<String>,
}

/// Effect of applying one event to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot changed and the stream stays open.
    Updated,
    /// The event was the last one; the stream must be closed.
    Finished,
    /// The snapshot is already terminal; nothing changed.
    Ignored,
}

impl Job {
    /// A freshly submitted job.
    pub fn pending(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            progress_current: None,
            progress_total: None,
            percentage: 0.0,
            message: None,
            result: None,
            error_detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a progress event.
    ///
    /// Terminal snapshots ignore every further event. A `pending` event
    /// never moves a `processing` job backwards, although its progress
    /// counters and message are still taken.
    pub fn apply(&mut self, event: &ProgressEvent) -> ApplyOutcome {
        if self.is_terminal() {
            return ApplyOutcome::Ignored;
        }

        if let Some(current) = event.progress_current {
            self.progress_current = Some(current);
        }
        if let Some(total) = event.progress_total {
            self.progress_total = Some(total);
        }
        if let (Some(current), Some(total)) = (self.progress_current, self.progress_total) {
            if let Some(pct) = progress_percentage(current, total) {
                self.percentage = pct;
            }
        }
        if let Some(message) = &event.message {
            self.message = Some(message.clone());
        }

        if self.status.can_transition_to(event.status) {
            self.status = event.status;
        } else {
            tracing::debug!(
                job_id = %self.job_id,
                from = %self.status,
                to = %event.status,
                "Ignoring status regression",
            );
        }

        match self.status {
            JobStatus::Completed => {
                self.result = event.result.clone();
                self.percentage = 100.0;
                if let Some(total) = self.progress_total {
                    self.progress_current = Some(total);
                }
            }
            JobStatus::Failed => {
                let detail = event
                    .error_detail
                    .clone()
                    .or_else(|| event.message.clone())
                    .unwrap_or_else(|| MISSING_FAILURE_DETAIL.to_string());
                self.error_detail = Some(detail);
            }
            _ => {}
        }

        if event.closes_stream() {
            ApplyOutcome::Finished
        } else {
            ApplyOutcome::Updated
        }
    }
}
