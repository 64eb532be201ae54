//! Message `type` tags exchanged over the push connection.
//!
//! The server vocabulary is expected to grow; consumers must treat any
//! tag not listed here as unknown and ignore it.

/// Server-initiated liveness probe. Must be answered with [`MSG_TYPE_PONG`].
pub const MSG_TYPE_PING: &str = "ping";

/// Client reply to [`MSG_TYPE_PING`], carrying an epoch-ms `timestamp`.
pub const MSG_TYPE_PONG: &str = "pong";

/// Stock level of a product changed.
pub const MSG_TYPE_STOCK_CHANGED: &str = "stock_changed";

/// An order arrived from an external sales channel.
pub const MSG_TYPE_EXTERNAL_ORDER: &str = "external_order";

/// A bulk synchronisation run finished.
pub const MSG_TYPE_BULK_SYNC_FINISHED: &str = "bulk_sync_finished";

/// A product crossed its configured stock threshold.
pub const MSG_TYPE_THRESHOLD_ALERT: &str = "threshold_alert";
