//! Push-connection message types and parser.
//!
//! The server sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`. Every frame is first parsed into
//! the loosely-typed [`InboundMessage`] envelope (so unknown types survive
//! parsing), and known notification types are then decoded into the
//! strongly-typed [`Notification`] enum.

use opsdash_core::message_types::{
    MSG_TYPE_BULK_SYNC_FINISHED, MSG_TYPE_EXTERNAL_ORDER, MSG_TYPE_PING, MSG_TYPE_PONG,
    MSG_TYPE_STOCK_CHANGED, MSG_TYPE_THRESHOLD_ALERT,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A raw inbound frame: a `type` tag plus an arbitrary `data` payload.
///
/// `data` is `null` when the server omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundMessage {
    /// Build a message from its parts.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// `true` for server-initiated liveness probes.
    pub fn is_ping(&self) -> bool {
        self.kind == MSG_TYPE_PING
    }
}

/// Parse a text frame into an [`InboundMessage`].
///
/// Returns `Err` for malformed JSON or a missing `type` field. Unknown
/// `type` values parse successfully.
pub fn parse_message(text: &str) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Serialize the heartbeat reply sent in response to a `ping`.
pub fn pong_frame(timestamp_ms: i64) -> String {
    serde_json::json!({
        "type": MSG_TYPE_PONG,
        "timestamp": timestamp_ms,
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Typed notifications
// ---------------------------------------------------------------------------

/// The fixed set of notification kinds the dispatcher routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    StockChanged,
    ExternalOrder,
    BulkSyncFinished,
    ThresholdAlert,
}

impl NotificationKind {
    /// Map a wire `type` tag to a kind. Returns `None` for unknown tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            MSG_TYPE_STOCK_CHANGED => Some(Self::StockChanged),
            MSG_TYPE_EXTERNAL_ORDER => Some(Self::ExternalOrder),
            MSG_TYPE_BULK_SYNC_FINISHED => Some(Self::BulkSyncFinished),
            MSG_TYPE_THRESHOLD_ALERT => Some(Self::ThresholdAlert),
            _ => None,
        }
    }

    /// Wire `type` tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            Self::StockChanged => MSG_TYPE_STOCK_CHANGED,
            Self::ExternalOrder => MSG_TYPE_EXTERNAL_ORDER,
            Self::BulkSyncFinished => MSG_TYPE_BULK_SYNC_FINISHED,
            Self::ThresholdAlert => MSG_TYPE_THRESHOLD_ALERT,
        }
    }
}

/// A decoded cross-cutting notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Stock level of a product changed.
    StockChanged(StockChangedData),

    /// An order was created by an external sales channel.
    ExternalOrder(ExternalOrderData),

    /// A bulk synchronisation run finished.
    BulkSyncFinished(BulkSyncFinishedData),

    /// A product crossed its stock threshold.
    ThresholdAlert(ThresholdAlertData),
}

impl Notification {
    /// Decode an envelope into a typed notification.
    ///
    /// Returns `Ok(None)` for unknown `type` tags and `Err` when the tag is
    /// known but `data` does not match the expected payload.
    pub fn from_message(msg: &InboundMessage) -> Result<Option<Self>, serde_json::Error> {
        let Some(kind) = NotificationKind::from_tag(&msg.kind) else {
            return Ok(None);
        };

        // A missing payload decodes like an empty object so all-optional
        // payloads still parse.
        let data = if msg.data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            msg.data.clone()
        };

        let notification = match kind {
            NotificationKind::StockChanged => Self::StockChanged(serde_json::from_value(data)?),
            NotificationKind::ExternalOrder => Self::ExternalOrder(serde_json::from_value(data)?),
            NotificationKind::BulkSyncFinished => {
                Self::BulkSyncFinished(serde_json::from_value(data)?)
            }
            NotificationKind::ThresholdAlert => {
                Self::ThresholdAlert(serde_json::from_value(data)?)
            }
        };
        Ok(Some(notification))
    }

    /// The kind of this notification.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::StockChanged(_) => NotificationKind::StockChanged,
            Self::ExternalOrder(_) => NotificationKind::ExternalOrder,
            Self::BulkSyncFinished(_) => NotificationKind::BulkSyncFinished,
            Self::ThresholdAlert(_) => NotificationKind::ThresholdAlert,
        }
    }
}

/// Payload for `stock_changed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StockChangedData {
    pub product_id: String,
    #[serde(default)]
    pub sku: Option<String>,
    /// Quantity after the change.
    pub quantity: i64,
    #[serde(default)]
    pub previous_quantity: Option<i64>,
}

/// Payload for `external_order`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalOrderData {
    pub order_id: String,
    /// Originating sales channel (marketplace, chat, ...).
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
}

/// Payload for `bulk_sync_finished`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BulkSyncFinishedData {
    #[serde(default)]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// Payload for `threshold_alert`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdAlertData {
    pub product_id: String,
    pub quantity: i64,
    pub threshold: i64,
}
