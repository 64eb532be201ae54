//! Progress stream event payloads.
//!
//! Each event on a job's progress stream is a JSON object:
//!
//! ```json
//! { "status": "processing", "progress_current": 3, "progress_total": 4,
//!   "mensagem_atual": "Importing rows", "finalizado": false }
//! ```
//!
//! Terminal events add `dados_resultado` (on `completed`) or
//! `erro_detalhes` (on `failed`) and set `finalizado` to `true`. A
//! server-sent `percentage` is not read; it is always derived locally.

use opsdash_core::job_status::JobStatus;
use serde::Deserialize;

/// One decoded progress event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressEvent {
    pub status: JobStatus,

    #[serde(default)]
    pub progress_current: Option<u64>,

    #[serde(default)]
    pub progress_total: Option<u64>,

    /// Free-text description of the current step.
    #[serde(default, rename = "mensagem_atual")]
    pub message: Option<String>,

    /// Marks the last event of the stream.
    #[serde(default, rename = "finalizado")]
    pub finished: bool,

    /// Result payload, present on `completed`.
    #[serde(default, rename = "dados_resultado")]
    pub result: Option<serde_json::Value>,

    /// Failure detail, present on `failed`.
    #[serde(default, rename = "erro_detalhes")]
    pub error_detail: Option<String>,
}

impl ProgressEvent {
    /// Whether the tracker must close the stream after this event.
    ///
    /// `finalizado` closes unconditionally; a terminal status closes even
    /// when the flag is missing.
    pub fn closes_stream(&self) -> bool {
        self.finished || self.status.is_terminal()
    }
}

/// Parse one event payload.
pub fn parse_event(payload: &str) -> Result<ProgressEvent, serde_json::Error> {
    serde_json::from_str(payload)
}
