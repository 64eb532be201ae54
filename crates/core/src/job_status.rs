//! Job lifecycle vocabulary and progress arithmetic.
//!
//! A job moves `pending -> processing -> {completed | failed | cancelled}`
//! and may jump from `pending` straight to any terminal status. Terminal
//! statuses are absorbing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum accepted length of a job identifier.
const MAX_JOB_ID_LEN: usize = 256;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Status of a server-side job as reported on its progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` for `completed`, `failed` and `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// Terminal statuses accept nothing, `processing` never returns to
    /// `pending`, and repeating the current status is always allowed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        !(self == Self::Processing && next == Self::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Derive a completion percentage from raw progress counters.
///
/// Returns `None` when `total` is zero, so callers can keep their previous
/// value instead of reporting a bogus 0%. The result is clamped to
/// `0.0..=100.0`.
pub fn progress_percentage(current: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(((current as f64 / total as f64) * 100.0).clamp(0.0, 100.0))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a job identifier before a stream is opened for it.
///
/// Rules:
/// - Must not be empty or whitespace only.
/// - Must not exceed `MAX_JOB_ID_LEN` characters.
/// - Must not contain `/`, `?` or `#`, since it is embedded in a URL path.
pub fn validate_job_id(job_id: &str) -> Result<(), CoreError> {
    if job_id.trim().is_empty() {
        return Err(CoreError::Validation(
            "Job id must not be empty".to_string(),
        ));
    }
    if job_id.len() > MAX_JOB_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Job id must not exceed {MAX_JOB_ID_LEN} characters"
        )));
    }
    if job_id.contains(['/', '?', '#']) {
        return Err(CoreError::Validation(format!(
            "Job id \"{job_id}\" contains a reserved URL character"
        )));
    }
    Ok(())
}
