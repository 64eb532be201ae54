//! Registry of tracked jobs and their progress streams.
//!
//! [`JobTracker`] keeps one [`Job`] snapshot per tracked id and at most
//! one live progress stream per job. Each stream runs in its own task,
//! applies events in arrival order and publishes a [`JobUpdate`] for
//! every applied event. The entry is removed exactly once: when the
//! terminal event arrives, which also drops (and thereby closes) the
//! stream, or when reconciliation retires a job the server no longer
//! lists whose stream already ended.
//!
//! Streams carry a generation number. Re-tracking or resyncing a job
//! replaces the generation, so a superseded stream task can neither
//! apply events to nor remove its successor's entry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use opsdash_core::error::CoreError;
use opsdash_core::job_status::{validate_job_id, JobStatus};
use opsdash_core::types::JobId;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::api::{JobApiError, JobControl, JobSummary};
use crate::event::{parse_event, ProgressEvent};
use crate::job::{ApplyOutcome, Job};
use crate::stream::ProgressSource;

/// Tracker settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Start tracking server-active jobs found during reconciliation.
    pub adopt_untracked: bool,
    /// Capacity of the update broadcast channel. Slow subscribers past
    /// this many updates observe `RecvError::Lagged`.
    pub update_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            adopt_untracked: true,
            update_capacity: 256,
        }
    }
}

/// Why an update was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The job is still running; more updates will follow.
    Progress,
    /// Last update for this job; its stream is closed.
    Finished,
    /// Last update for this job: the server no longer lists it and its
    /// stream ended without a terminal event. The snapshot is the last
    /// known state.
    Retired,
}

/// Snapshot published after every applied progress event.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job: Job,
    pub kind: UpdateKind,
}

/// Jobs touched by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Server-active jobs that were not tracked and now are.
    pub adopted: Vec<JobId>,
    /// Tracked jobs whose stream was re-opened.
    pub resynced: Vec<JobId>,
    /// Unlisted jobs with a dead stream that were dropped.
    pub retired: Vec<JobId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.adopted.is_empty() && self.resynced.is_empty() && self.retired.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid job id: {0}")]
    InvalidJobId(#[from] CoreError),

    #[error("Job {0} is not tracked")]
    NotTracked(JobId),

    #[error("Job control request failed: {0}")]
    Control(#[from] JobApiError),
}

/// One registry entry.
struct TrackedJob {
    snapshot: Job,
    generation: u64,
    /// `false` once the stream ended without a terminal event.
    stream_live: bool,
    cancel: CancellationToken,
}

/// Tracks long-running jobs through their progress streams.
///
/// Created via [`JobTracker::new`]; all methods take `&self` or
/// `&Arc<Self>`, so the tracker can be shared freely between tasks.
pub struct JobTracker {
    source: Arc<dyn ProgressSource>,
    control: Arc<dyn JobControl>,
    config: TrackerConfig,
    jobs: RwLock<HashMap<JobId, TrackedJob>>,
    update_tx: broadcast::Sender<JobUpdate>,
    next_generation: AtomicU64,
}

impl JobTracker {
    pub fn new(
        source: Arc<dyn ProgressSource>,
        control: Arc<dyn JobControl>,
        config: TrackerConfig,
    ) -> Arc<Self> {
        let (update_tx, _) = broadcast::channel(config.update_capacity.max(1));
        Arc::new(Self {
            source,
            control,
            config,
            jobs: RwLock::new(HashMap::new()),
            update_tx,
            next_generation: AtomicU64::new(0),
        })
    }

    /// Start tracking `job_id` and open its progress stream.
    ///
    /// A prior stream for the same id is closed first and its snapshot is
    /// kept; otherwise the job starts as `pending`. Returns the snapshot
    /// the new stream starts from.
    pub async fn track(self: &Arc<Self>, job_id: &str) -> Result<Job, TrackerError> {
        validate_job_id(job_id)?;

        let mut jobs = self.jobs.write().await;
        let superseded = jobs.contains_key(job_id);
        let job = self.install_stream(&mut jobs, job_id, || Job::pending(job_id));
        drop(jobs);

        tracing::info!(job_id, superseded, "Tracking job");
        Ok(job)
    }

    /// Subscribe to job updates. Only updates published after this call
    /// are received.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.update_tx.subscribe()
    }

    /// Request cancellation of a tracked job.
    ///
    /// The stream stays open; the outcome arrives as a `cancelled` (or,
    /// if the job beat the request, `completed`/`failed`) event.
    pub async fn cancel(&self, job_id: &str) -> Result<(), TrackerError> {
        if !self.jobs.read().await.contains_key(job_id) {
            return Err(TrackerError::NotTracked(job_id.to_string()));
        }

        if let Err(e) = self.control.cancel_job(job_id).await {
            tracing::error!(job_id, error = %e, "Cancel request failed");
            return Err(e.into());
        }

        tracing::info!(job_id, "Cancel requested");
        Ok(())
    }

    /// Stop tracking a job without contacting the backend.
    ///
    /// Returns `false` if the job was not tracked.
    pub async fn discard(&self, job_id: &str) -> bool {
        let removed = self.jobs.write().await.remove(job_id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::debug!(job_id, "Job discarded");
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self, job_id: &str) -> Option<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Snapshots of every tracked job, ordered by id.
    pub async fn active_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    pub async fn tracked_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether the job's stream is still open. `None` if not tracked.
    pub async fn is_stream_live(&self, job_id: &str) -> Option<bool> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|entry| entry.stream_live)
    }

    /// Close every stream and forget every job.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        for (_, entry) in jobs.drain() {
            entry.cancel.cancel();
        }
        tracing::info!(count, "Job tracker shut down");
    }

    /// Align the registry with the server's list of active jobs.
    ///
    /// Live streams are never touched: a job missing from the listing may
    /// have just finished, and its terminal event is still on the way.
    /// A dead stream is re-opened while the server lists the job. Once
    /// the server stops listing it, the entry is dropped and a
    /// [`UpdateKind::Retired`] update is published. With
    /// `adopt_untracked`, starts tracking server-active jobs that are
    /// missing locally, seeded from the listing.
    pub async fn reconcile(self: &Arc<Self>, active: &[JobSummary]) -> ReconcileReport {
        let listed: HashSet<&str> = active.iter().map(|s| s.job_id.as_str()).collect();
        let mut report = ReconcileReport::default();
        let mut retired_jobs = Vec::new();

        let mut jobs = self.jobs.write().await;

        let mut dead: Vec<JobId> = jobs
            .iter()
            .filter(|(_, entry)| !entry.stream_live)
            .map(|(id, _)| id.clone())
            .collect();
        dead.sort();

        for job_id in dead {
            if listed.contains(job_id.as_str()) {
                self.install_stream(&mut jobs, &job_id, || Job::pending(job_id.as_str()));
                report.resynced.push(job_id);
            } else if let Some(entry) = jobs.remove(&job_id) {
                entry.cancel.cancel();
                retired_jobs.push(entry.snapshot);
                report.retired.push(job_id);
            }
        }

        if self.config.adopt_untracked {
            for summary in active {
                if jobs.contains_key(&summary.job_id) {
                    continue;
                }
                if let Err(e) = validate_job_id(&summary.job_id) {
                    tracing::warn!(job_id = %summary.job_id, error = %e, "Skipping unusable job id");
                    continue;
                }
                if summary.status.is_some_and(JobStatus::is_terminal) {
                    continue;
                }
                self.install_stream(&mut jobs, &summary.job_id, || seed_from_summary(summary));
                report.adopted.push(summary.job_id.clone());
            }
        }
        drop(jobs);

        for job in retired_jobs {
            tracing::info!(
                job_id = %job.job_id,
                status = %job.status,
                percentage = job.percentage,
                "Job no longer listed, tracking stopped",
            );
            let _ = self.update_tx.send(JobUpdate {
                job,
                kind: UpdateKind::Retired,
            });
        }

        if !report.is_empty() {
            tracing::info!(
                adopted = report.adopted.len(),
                resynced = report.resynced.len(),
                retired = report.retired.len(),
                "Reconciled tracked jobs",
            );
        }
        report
    }

    /// Fetch the active-job listing and [`reconcile`](Self::reconcile).
    pub async fn poll_once(self: &Arc<Self>) -> Result<ReconcileReport, TrackerError> {
        let active = self.control.list_active_jobs().await?;
        Ok(self.reconcile(&active).await)
    }

    // ---- private helpers ----

    /// Replace the job's stream with a new generation and spawn it.
    ///
    /// Keeps an existing snapshot; uses `seed` for a new entry.
    fn install_stream(
        self: &Arc<Self>,
        jobs: &mut HashMap<JobId, TrackedJob>,
        job_id: &str,
        seed: impl FnOnce() -> Job,
    ) -> Job {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let snapshot = match jobs.remove(job_id) {
            Some(previous) => {
                previous.cancel.cancel();
                previous.snapshot
            }
            None => seed(),
        };

        jobs.insert(
            job_id.to_string(),
            TrackedJob {
                snapshot: snapshot.clone(),
                generation,
                stream_live: true,
                cancel: cancel.clone(),
            },
        );

        let tracker = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tracker.run_stream(job_id, generation, cancel).await;
        });

        snapshot
    }

    /// Consume one job's stream until a terminal event, stream end, or
    /// cancellation.
    async fn run_stream(self: Arc<Self>, job_id: JobId, generation: u64, cancel: CancellationToken) {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = self.source.open(&job_id) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to open progress stream");
                self.mark_stream_dead(&job_id, generation).await;
                return;
            }
        };

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = %job_id, generation, "Progress stream closed");
                    return;
                }
                item = stream.next() => item,
            };

            let payload = match item {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Progress stream failed");
                    break;
                }
                None => {
                    tracing::warn!(job_id = %job_id, "Progress stream ended without a terminal event");
                    break;
                }
            };

            let event = match parse_event(&payload) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Dropping malformed progress event");
                    continue;
                }
            };

            if self.apply_event(&job_id, generation, &event).await {
                return;
            }
        }

        self.mark_stream_dead(&job_id, generation).await;
    }

    /// Apply one event to the current generation's entry and publish the
    /// update. Returns `true` when the stream must stop.
    async fn apply_event(&self, job_id: &str, generation: u64, event: &ProgressEvent) -> bool {
        let (job, outcome) = {
            let mut jobs = self.jobs.write().await;
            let Some(entry) = jobs.get_mut(job_id) else {
                return true;
            };
            if entry.generation != generation {
                return true;
            }
            let outcome = entry.snapshot.apply(event);
            let job = entry.snapshot.clone();
            if outcome != ApplyOutcome::Updated {
                jobs.remove(job_id);
            }
            (job, outcome)
        };

        let kind = match outcome {
            ApplyOutcome::Updated => {
                tracing::debug!(
                    job_id,
                    status = %job.status,
                    percentage = job.percentage,
                    "Job progress",
                );
                UpdateKind::Progress
            }
            ApplyOutcome::Finished => {
                log_finished(&job);
                UpdateKind::Finished
            }
            ApplyOutcome::Ignored => return true,
        };

        // No subscribers is fine; snapshots stay queryable.
        let _ = self.update_tx.send(JobUpdate { job, kind });
        kind == UpdateKind::Finished
    }

    async fn mark_stream_dead(&self, job_id: &str, generation: u64) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.generation == generation {
                entry.stream_live = false;
            }
        }
    }
}

fn log_finished(job: &Job) {
    match job.status {
        JobStatus::Completed => {
            tracing::info!(job_id = %job.job_id, "Job completed");
        }
        JobStatus::Failed => {
            tracing::warn!(
                job_id = %job.job_id,
                error = job.error_detail.as_deref().unwrap_or_default(),
                "Job failed",
            );
        }
        JobStatus::Cancelled => {
            tracing::info!(job_id = %job.job_id, "Job cancelled");
        }
        status => {
            tracing::info!(job_id = %job.job_id, %status, "Progress stream finished");
        }
    }
}

/// Initial snapshot for a job adopted from the active-job listing.
fn seed_from_summary(summary: &JobSummary) -> Job {
    let mut job = Job::pending(summary.job_id.as_str());
    job.apply(&ProgressEvent {
        status: summary.status.unwrap_or(JobStatus::Pending),
        progress_current: summary.progress_current,
        progress_total: summary.progress_total,
        message: summary.message.clone(),
        finished: false,
        result: None,
        error_detail: None,
    });
    job
}
