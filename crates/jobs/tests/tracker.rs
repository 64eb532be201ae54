//! Integration tests for `JobTracker`.
//!
//! Progress streams are in-memory channels fed by the test, so every
//! scenario controls exactly which payloads arrive and when the server
//! side ends a stream.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{
    assert_no_update, next_open, next_update, summary, wait_closed, wait_stream_live,
    ChannelSource, FakeControl, Feed,
};
use opsdash_core::job_status::JobStatus;
use opsdash_jobs::reconcile::run_reconciliation;
use opsdash_jobs::{JobTracker, TrackerConfig, TrackerError, UpdateKind};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn tracker_with(
    config: TrackerConfig,
) -> (
    Arc<JobTracker>,
    tokio::sync::mpsc::UnboundedReceiver<(String, Feed)>,
    Arc<FakeControl>,
) {
    let (source, opened) = ChannelSource::new();
    let control = FakeControl::new();
    let tracker = JobTracker::new(source, control.clone(), config);
    (tracker, opened, control)
}

// ---------------------------------------------------------------------------
// Test: end-to-end progress to completion releases the stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_to_completion_releases_stream() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    let initial = tracker.track("abc123").await.unwrap();
    assert_eq!(initial.status, JobStatus::Pending);
    assert_eq!(initial.percentage, 0.0);

    let (job_id, feed) = next_open(&mut opened).await;
    assert_eq!(job_id, "abc123");

    feed.send(r#"{"status":"processing","progress_current":1,"progress_total":4,"finalizado":false}"#);
    let update = next_update(&mut updates).await;
    assert_eq!(update.kind, UpdateKind::Progress);
    assert_eq!(update.job.status, JobStatus::Processing);
    assert_eq!(update.job.percentage, 25.0);

    feed.send(r#"{"status":"processing","progress_current":3,"progress_total":4,"finalizado":false}"#);
    assert_eq!(next_update(&mut updates).await.job.percentage, 75.0);

    feed.send(r#"{"status":"completed","finalizado":true,"dados_resultado":{"rows":42}}"#);
    let update = next_update(&mut updates).await;
    assert_eq!(update.kind, UpdateKind::Finished);
    assert_eq!(update.job.status, JobStatus::Completed);
    assert_eq!(update.job.percentage, 100.0);
    assert_eq!(update.job.result, Some(json!({"rows": 42})));

    wait_closed(&feed).await;
    assert_eq!(tracker.tracked_count().await, 0);
    assert!(tracker.snapshot("abc123").await.is_none());
}

// ---------------------------------------------------------------------------
// Test: pending straight to failed surfaces the detail
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_to_failed_surfaces_detail() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("imp-9").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    feed.send(r#"{"status":"failed","finalizado":true,"erro_detalhes":"Coluna SKU ausente"}"#);
    let update = next_update(&mut updates).await;
    assert_eq!(update.kind, UpdateKind::Finished);
    assert_eq!(update.job.status, JobStatus::Failed);
    assert_eq!(update.job.error_detail.as_deref(), Some("Coluna SKU ausente"));
    assert!(update.job.result.is_none());

    wait_closed(&feed).await;
}

// ---------------------------------------------------------------------------
// Test: nothing is applied after a terminal event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_after_terminal_are_not_applied() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("j-term").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    // Both payloads are queued before the tracker reads either.
    feed.send(r#"{"status":"cancelled","finalizado":true}"#);
    feed.send(r#"{"status":"completed","finalizado":true,"dados_resultado":{}}"#);

    let update = next_update(&mut updates).await;
    assert_eq!(update.job.status, JobStatus::Cancelled);
    assert_eq!(update.kind, UpdateKind::Finished);
    assert_no_update(&mut updates).await;
}

// ---------------------------------------------------------------------------
// Test: a malformed payload is dropped and the stream stays open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_payload_is_skipped() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("j-bad").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    feed.send("{not json");
    feed.send(r#"{"status":"exploded"}"#);
    feed.send(r#"{"status":"processing","progress_current":1,"progress_total":2}"#);

    let update = next_update(&mut updates).await;
    assert_eq!(update.job.percentage, 50.0);
    assert!(!feed.is_closed());
    assert_eq!(tracker.is_stream_live("j-bad").await, Some(true));
}

// ---------------------------------------------------------------------------
// Test: re-tracking closes the old stream and keeps the snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrack_supersedes_previous_stream() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("j-re").await.unwrap();
    let (_, first) = next_open(&mut opened).await;
    first.send(r#"{"status":"processing","progress_current":1,"progress_total":2}"#);
    next_update(&mut updates).await;

    let snapshot = tracker.track("j-re").await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);
    assert_eq!(snapshot.percentage, 50.0);

    let (_, second) = next_open(&mut opened).await;
    wait_closed(&first).await;
    assert_eq!(tracker.tracked_count().await, 1);

    second.send(r#"{"status":"completed","finalizado":true}"#);
    let update = next_update(&mut updates).await;
    assert_eq!(update.kind, UpdateKind::Finished);
    assert_eq!(update.job.progress_current, Some(2));
}

// ---------------------------------------------------------------------------
// Test: cancel() leaves the stream open for the cancelled event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_waits_for_cancelled_event() {
    let (tracker, mut opened, control) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("j-cancel").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    tracker.cancel("j-cancel").await.unwrap();
    assert_eq!(control.cancelled(), vec!["j-cancel".to_string()]);
    assert!(!feed.is_closed());
    assert!(tracker.snapshot("j-cancel").await.is_some());

    feed.send(r#"{"status":"cancelled","finalizado":true,"mensagem_atual":"Cancelado pelo usuário"}"#);
    let update = next_update(&mut updates).await;
    assert_eq!(update.job.status, JobStatus::Cancelled);
    assert_eq!(update.job.message.as_deref(), Some("Cancelado pelo usuário"));
    wait_closed(&feed).await;
}

// ---------------------------------------------------------------------------
// Test: cancel() error paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_unknown_job_is_not_tracked() {
    let (tracker, _opened, control) = tracker_with(TrackerConfig::default());

    let err = tracker.cancel("ghost").await.unwrap_err();
    assert_matches!(err, TrackerError::NotTracked(id) if id == "ghost");
    assert!(control.cancelled().is_empty());
}

#[tokio::test]
async fn cancel_failure_is_returned() {
    let (tracker, mut opened, control) = tracker_with(TrackerConfig::default());
    tracker.track("j-503").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    *control.fail_requests.lock().unwrap() = true;
    let err = tracker.cancel("j-503").await.unwrap_err();
    assert_matches!(err, TrackerError::Control(_));
    assert!(!feed.is_closed());
}

// ---------------------------------------------------------------------------
// Test: discard() closes the stream without contacting the backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discard_releases_stream() {
    let (tracker, mut opened, control) = tracker_with(TrackerConfig::default());
    tracker.track("j-drop").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    assert!(tracker.discard("j-drop").await);
    wait_closed(&feed).await;
    assert_eq!(tracker.tracked_count().await, 0);
    assert!(control.cancelled().is_empty());

    assert!(!tracker.discard("j-drop").await);
}

// ---------------------------------------------------------------------------
// Test: invalid ids are rejected before anything is opened
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_job_id_is_rejected() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());

    assert_matches!(tracker.track("").await, Err(TrackerError::InvalidJobId(_)));
    assert_matches!(tracker.track("   ").await, Err(TrackerError::InvalidJobId(_)));
    assert_matches!(tracker.track("a/b").await, Err(TrackerError::InvalidJobId(_)));

    assert_eq!(tracker.tracked_count().await, 0);
    assert!(opened.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: a stream that ends early is marked dead and resynced
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dead_stream_is_resynced_by_reconcile() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("j-dead").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;
    feed.send(r#"{"status":"processing","progress_current":2,"progress_total":8}"#);
    next_update(&mut updates).await;
    feed.end();

    wait_stream_live(&tracker, "j-dead", false).await;
    let snapshot = tracker.snapshot("j-dead").await.unwrap();
    assert_eq!(snapshot.percentage, 25.0);

    let report = tracker.reconcile(&[summary("j-dead", Some((2, 8)))]).await;
    assert_eq!(report.resynced, vec!["j-dead".to_string()]);
    assert!(report.adopted.is_empty());

    let (job_id, feed) = next_open(&mut opened).await;
    assert_eq!(job_id, "j-dead");
    assert_eq!(tracker.is_stream_live("j-dead").await, Some(true));

    feed.send(r#"{"status":"completed","finalizado":true,"dados_resultado":{"rows":8}}"#);
    assert_eq!(next_update(&mut updates).await.kind, UpdateKind::Finished);
}

#[tokio::test]
async fn rejected_stream_is_marked_dead() {
    let (source, _opened) = ChannelSource::new();
    source.reject("j-404");
    let tracker = JobTracker::new(source, FakeControl::new(), TrackerConfig::default());

    tracker.track("j-404").await.unwrap();
    wait_stream_live(&tracker, "j-404", false).await;
}

// ---------------------------------------------------------------------------
// Test: reconcile() leaves healthy streams alone
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconcile_keeps_live_listed_streams() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    tracker.track("j-ok").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    let report = tracker.reconcile(&[summary("j-ok", None)]).await;
    assert!(report.is_empty());
    assert!(!feed.is_closed());
}

#[tokio::test]
async fn reconcile_leaves_unlisted_live_stream_open() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();
    tracker.track("j-new").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;

    // Not listed yet (or no longer): the live stream still owes the final state.
    let report = tracker.reconcile(&[]).await;
    assert!(report.is_empty());
    assert!(!feed.is_closed());
    assert_eq!(tracker.is_stream_live("j-new").await, Some(true));

    assert!(feed.send(r#"{"status":"completed","finalizado":true}"#));
    let update = next_update(&mut updates).await;
    assert_eq!(update.kind, UpdateKind::Finished);
    assert_eq!(update.job.status, JobStatus::Completed);
    assert_eq!(tracker.tracked_count().await, 0);
    assert!(opened.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: unlisted jobs whose stream died are retired exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unlisted_dead_job_is_retired_once() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("j-gone").await.unwrap();
    let (_, feed) = next_open(&mut opened).await;
    feed.send(r#"{"status":"processing","progress_current":1,"progress_total":4}"#);
    next_update(&mut updates).await;
    feed.end();
    wait_stream_live(&tracker, "j-gone", false).await;

    let report = tracker.reconcile(&[]).await;
    assert_eq!(report.retired, vec!["j-gone".to_string()]);
    assert!(report.resynced.is_empty());

    let update = next_update(&mut updates).await;
    assert_eq!(update.kind, UpdateKind::Retired);
    assert_eq!(update.job.job_id, "j-gone");
    assert_eq!(update.job.status, JobStatus::Processing);
    assert_eq!(update.job.percentage, 25.0);

    assert_eq!(tracker.tracked_count().await, 0);
    assert!(opened.try_recv().is_err());
    assert!(tracker.reconcile(&[]).await.is_empty());
    assert_no_update(&mut updates).await;
}

#[tokio::test]
async fn rejected_unlisted_job_converges() {
    let (source, mut opened) = ChannelSource::new();
    source.reject("j-purged");
    let tracker = JobTracker::new(source, FakeControl::new(), TrackerConfig::default());
    let mut updates = tracker.subscribe();

    tracker.track("j-purged").await.unwrap();
    wait_stream_live(&tracker, "j-purged", false).await;

    let reports = [
        tracker.reconcile(&[]).await,
        tracker.reconcile(&[]).await,
        tracker.reconcile(&[]).await,
        tracker.reconcile(&[]).await,
        tracker.reconcile(&[]).await,
    ];
    assert_eq!(reports[0].retired, vec!["j-purged".to_string()]);
    assert!(reports[0].resynced.is_empty());
    assert!(reports[1..].iter().all(|report| report.is_empty()));

    assert_eq!(next_update(&mut updates).await.kind, UpdateKind::Retired);
    assert_no_update(&mut updates).await;
    assert_eq!(tracker.tracked_count().await, 0);
    assert!(opened.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: untracked server-active jobs are adopted when configured
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_adopts_untracked_jobs() {
    let (tracker, mut opened, control) = tracker_with(TrackerConfig::default());
    let mut finished = summary("ext-done", None);
    finished.status = Some(JobStatus::Completed);
    control.set_active(vec![summary("ext-1", Some((2, 4))), finished]);

    let report = tracker.poll_once().await.unwrap();
    assert_eq!(report.adopted, vec!["ext-1".to_string()]);

    let (job_id, _feed) = next_open(&mut opened).await;
    assert_eq!(job_id, "ext-1");
    let snapshot = tracker.snapshot("ext-1").await.unwrap();
    assert_eq!(snapshot.percentage, 50.0);
    assert!(tracker.snapshot("ext-done").await.is_none());
}

#[tokio::test]
async fn poll_without_adoption_ignores_untracked_jobs() {
    let config = TrackerConfig {
        adopt_untracked: false,
        ..Default::default()
    };
    let (tracker, _opened, control) = tracker_with(config);
    control.set_active(vec![summary("ext-1", None)]);

    let report = tracker.poll_once().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(tracker.tracked_count().await, 0);
}

#[tokio::test]
async fn poll_failure_is_returned() {
    let (tracker, _opened, control) = tracker_with(TrackerConfig::default());
    *control.fail_requests.lock().unwrap() = true;

    assert_matches!(tracker.poll_once().await, Err(TrackerError::Control(_)));
}

// ---------------------------------------------------------------------------
// Test: the reconciliation loop polls until cancelled
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconciliation_loop_adopts_and_stops() {
    let (tracker, mut opened, control) = tracker_with(TrackerConfig::default());
    control.set_active(vec![summary("ext-loop", None)]);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_reconciliation(
        Arc::clone(&tracker),
        Duration::from_millis(20),
        cancel.clone(),
    ));

    let (job_id, _feed) = next_open(&mut opened).await;
    assert_eq!(job_id, "ext-loop");

    cancel.cancel();
    tokio::time::timeout(common::WAIT, handle)
        .await
        .expect("reconciliation loop did not stop")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: shutdown() closes every stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_closes_all_streams() {
    let (tracker, mut opened, _) = tracker_with(TrackerConfig::default());
    tracker.track("a").await.unwrap();
    tracker.track("b").await.unwrap();
    let (_, feed_a) = next_open(&mut opened).await;
    let (_, feed_b) = next_open(&mut opened).await;

    let ids: Vec<_> = tracker.active_jobs().await.into_iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

    tracker.shutdown().await;
    assert_eq!(tracker.tracked_count().await, 0);
    wait_closed(&feed_a).await;
    wait_closed(&feed_b).await;
}
