//! `opsdash-monitor` -- headless client for the operations dashboard backend.
//!
//! Holds the push connection open, logs every notification it receives,
//! follows the progress of selected background jobs and reconciles them
//! against the server periodically. Stops on Ctrl-C.
//!
//! See [`opsdash_monitor::config::MonitorConfig::from_env`] for the
//! environment variables.

use std::sync::Arc;

use opsdash_jobs::reconcile::run_reconciliation;
use opsdash_jobs::{JobTracker, JobsApi, SseProgressSource, TrackerConfig};
use opsdash_monitor::config::{LogFormat, MonitorConfig};
use opsdash_monitor::handlers::{log_job_update, register_logging_handlers};
use opsdash_realtime::client::RealtimeClient;
use opsdash_realtime::{ConnectOutcome, ConnectionManager, NotificationDispatcher};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = MonitorConfig::from_env();
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or(LogFormat::Text);
    init_tracing(log_format);

    let config = config.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        ws_url = %config.ws_url,
        api_url = %config.api_url,
        max_attempts = config.reconnect.max_attempts,
        poll_interval_secs = config.poll_interval.as_secs(),
        "Starting opsdash-monitor",
    );

    // --- Push connection + notification dispatch ---
    let (manager, events) = ConnectionManager::new(
        RealtimeClient::new(config.ws_url.clone()).with_connect_timeout(config.connect_timeout),
        config.reconnect.clone(),
    );
    let mut dispatcher = NotificationDispatcher::new();
    register_logging_handlers(&mut dispatcher);
    let dispatcher_handle = tokio::spawn(dispatcher.run(events));

    if manager.connect().await != ConnectOutcome::Started {
        tracing::warn!("Push connection did not start");
    }

    // --- Job tracking ---
    let http = reqwest::Client::new();
    let source = Arc::new(SseProgressSource::with_client(http.clone(), config.api_url.clone()));
    let control = Arc::new(JobsApi::with_client(http, config.api_url.clone()));
    let tracker = JobTracker::new(source, control, TrackerConfig::default());

    let mut updates = tracker.subscribe();
    let updates_handle = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => log_job_update(&update),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Job update logger lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    for job_id in &config.track_job_ids {
        if let Err(e) = tracker.track(job_id).await {
            tracing::error!(job_id = %job_id, error = %e, "Cannot track job");
        }
    }

    let cancel = CancellationToken::new();
    let poll_handle = tokio::spawn(run_reconciliation(
        Arc::clone(&tracker),
        config.poll_interval,
        cancel.clone(),
    ));

    // --- Run until Ctrl-C ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    manager.disconnect().await;
    cancel.cancel();
    let _ = poll_handle.await;
    tracker.shutdown().await;

    // Dropping the last handles closes the event and update channels,
    // which ends both logging loops.
    drop(manager);
    drop(tracker);
    let _ = dispatcher_handle.await;
    let _ = updates_handle.await;

    tracing::info!("opsdash-monitor stopped");
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "opsdash_monitor=info,opsdash_realtime=info,opsdash_jobs=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
