//! Asynchronous job progress tracking.
//!
//! Each long-running backend job gets its own one-way progress stream
//! (Server-Sent Events). [`JobTracker`] owns the registry of tracked
//! jobs, applies progress events to per-job [`Job`] snapshots, publishes
//! a [`JobUpdate`] for every applied event, and closes a job's stream the
//! moment a terminal event arrives. A low-frequency reconciliation poll
//! ([`reconcile`]) catches streams that died silently.

pub mod api;
pub mod event;
pub mod job;
pub mod reconcile;
pub mod sse;
pub mod stream;
pub mod tracker;

pub use api::{JobApiError, JobControl, JobSummary, JobsApi, SubmitResponse};
pub use event::{parse_event, ProgressEvent};
pub use job::{ApplyOutcome, Job};
pub use stream::{EventStream, ProgressSource, SseProgressSource, StreamError};
pub use tracker::{JobTracker, JobUpdate, ReconcileReport, TrackerConfig, TrackerError, UpdateKind};
