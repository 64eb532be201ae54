#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as feed_channel;
use futures::StreamExt;
use opsdash_core::types::JobId;
use opsdash_jobs::{
    EventStream, JobApiError, JobControl, JobSummary, JobTracker, JobUpdate, ProgressSource,
    StreamError,
};
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// In-memory progress source
// ---------------------------------------------------------------------------

/// Test handle feeding one opened progress stream.
pub struct Feed {
    tx: feed_channel::UnboundedSender<Result<String, StreamError>>,
}

impl Feed {
    /// Push a raw payload. Returns `false` once the tracker dropped the stream.
    pub fn send(&self, payload: &str) -> bool {
        self.tx.unbounded_send(Ok(payload.to_string())).is_ok()
    }

    pub fn fail(&self, reason: &str) -> bool {
        self.tx
            .unbounded_send(Err(StreamError::Interrupted(reason.to_string())))
            .is_ok()
    }

    /// Whether the tracker released the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// End the stream from the server side.
    pub fn end(self) {
        self.tx.close_channel();
    }
}

/// [`ProgressSource`] whose streams are fed by the test.
///
/// Every `open` is reported on the receiver returned by [`ChannelSource::new`].
pub struct ChannelSource {
    opened_tx: mpsc::UnboundedSender<(JobId, Feed)>,
    rejected: Mutex<HashSet<JobId>>,
}

impl ChannelSource {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(JobId, Feed)>) {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let source = Arc::new(Self {
            opened_tx,
            rejected: Mutex::new(HashSet::new()),
        });
        (source, opened_rx)
    }

    /// Make every future `open` for `job_id` fail with a 404.
    pub fn reject(&self, job_id: &str) {
        self.rejected.lock().unwrap().insert(job_id.to_string());
    }
}

#[async_trait]
impl ProgressSource for ChannelSource {
    async fn open(&self, job_id: &str) -> Result<EventStream, StreamError> {
        if self.rejected.lock().unwrap().contains(job_id) {
            return Err(StreamError::Rejected {
                status: 404,
                body: "unknown job".to_string(),
            });
        }
        let (tx, rx) = feed_channel::unbounded();
        let _ = self.opened_tx.send((job_id.to_string(), Feed { tx }));
        Ok(rx.boxed())
    }
}

/// Wait for the next stream the tracker opens.
pub async fn next_open(rx: &mut mpsc::UnboundedReceiver<(JobId, Feed)>) -> (JobId, Feed) {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a stream to open")
        .expect("source dropped")
}

// ---------------------------------------------------------------------------
// In-memory job control
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeControl {
    pub cancelled: Mutex<Vec<JobId>>,
    pub active: Mutex<Vec<JobSummary>>,
    pub fail_requests: Mutex<bool>,
}

impl FakeControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_active(&self, active: Vec<JobSummary>) {
        *self.active.lock().unwrap() = active;
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        self.cancelled.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), JobApiError> {
        if *self.fail_requests.lock().unwrap() {
            return Err(JobApiError::Api {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobControl for FakeControl {
    async fn cancel_job(&self, job_id: &str) -> Result<(), JobApiError> {
        self.check()?;
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn list_active_jobs(&self) -> Result<Vec<JobSummary>, JobApiError> {
        self.check()?;
        Ok(self.active.lock().unwrap().clone())
    }
}

pub fn summary(job_id: &str, progress: Option<(u64, u64)>) -> JobSummary {
    JobSummary {
        job_id: job_id.to_string(),
        status: None,
        progress_current: progress.map(|(current, _)| current),
        progress_total: progress.map(|(_, total)| total),
        message: None,
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

pub async fn next_update(rx: &mut broadcast::Receiver<JobUpdate>) -> JobUpdate {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a job update")
        .expect("update channel closed")
}

/// Assert nothing is published for a short while.
pub async fn assert_no_update(rx: &mut broadcast::Receiver<JobUpdate>) {
    let res = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(res.is_err(), "unexpected update: {res:?}");
}

/// Wait until the tracker has released `feed`'s stream.
pub async fn wait_closed(feed: &Feed) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !feed.is_closed() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "stream was not released in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the job's stream liveness reads `live`.
pub async fn wait_stream_live(tracker: &JobTracker, job_id: &str, live: bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tracker.is_stream_live(job_id).await != Some(live) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "stream liveness of {job_id} never became {live}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
