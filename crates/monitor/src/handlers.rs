//! Logging consumers for notifications and job updates.

use opsdash_jobs::{JobUpdate, UpdateKind};
use opsdash_realtime::{Notification, NotificationDispatcher, NotificationKind};

/// Register one logging handler per notification kind.
pub fn register_logging_handlers(dispatcher: &mut NotificationDispatcher) {
    dispatcher
        .register(NotificationKind::StockChanged, log_notification)
        .register(NotificationKind::ExternalOrder, log_notification)
        .register(NotificationKind::BulkSyncFinished, log_notification)
        .register(NotificationKind::ThresholdAlert, log_notification);
}

pub fn log_notification(notification: &Notification) {
    match notification {
        Notification::StockChanged(data) => {
            tracing::info!(
                product_id = %data.product_id,
                sku = data.sku.as_deref(),
                quantity = data.quantity,
                previous_quantity = data.previous_quantity,
                "Stock changed",
            );
        }
        Notification::ExternalOrder(data) => {
            tracing::info!(
                order_id = %data.order_id,
                channel = data.channel.as_deref(),
                total = data.total,
                "External order received",
            );
        }
        Notification::BulkSyncFinished(data) => {
            tracing::info!(
                sync_id = data.sync_id.as_deref(),
                processed = data.processed,
                failed = data.failed,
                "Bulk sync finished",
            );
        }
        Notification::ThresholdAlert(data) => {
            tracing::warn!(
                product_id = %data.product_id,
                quantity = data.quantity,
                threshold = data.threshold,
                "Stock below threshold",
            );
        }
    }
}

pub fn log_job_update(update: &JobUpdate) {
    let job = &update.job;
    match update.kind {
        UpdateKind::Progress => {
            tracing::info!(
                job_id = %job.job_id,
                status = %job.status,
                percentage = job.percentage,
                message = job.message.as_deref(),
                "Job progress",
            );
        }
        UpdateKind::Finished => {
            tracing::info!(
                job_id = %job.job_id,
                status = %job.status,
                error = job.error_detail.as_deref(),
                result = job.result.as_ref().map(|r| r.to_string()),
                "Job finished",
            );
        }
        UpdateKind::Retired => {
            tracing::warn!(
                job_id = %job.job_id,
                status = %job.status,
                percentage = job.percentage,
                "Job dropped without a final state",
            );
        }
    }
}
