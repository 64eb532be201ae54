//! Events emitted by the connection manager.
//!
//! These are the consumer-facing equivalent of `onOpen` / `onClose` /
//! `onMessage` / `onError` callbacks. They are delivered on a single
//! unbounded channel in the order the transport produced them.

use std::time::Duration;

use serde::Serialize;

use crate::messages::InboundMessage;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code sent when an endpoint is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A connection-level event.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The transport opened; `attempt` was reset to 0.
    Opened { connection_id: String },

    /// An inbound message, in arrival order. Heartbeat probes are not
    /// forwarded.
    Message(InboundMessage),

    /// The transport closed.
    Closed {
        code: Option<u16>,
        reason: String,
        severity: CloseSeverity,
    },

    /// A reconnection was scheduled.
    Reconnecting { attempt: u32, delay: Duration },

    /// A transport error or the circuit breaker tripping.
    Error(ConnectionError),
}

/// Whether a close is part of normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseSeverity {
    /// Clean close or going-away; not shown to users.
    Expected,
    /// Anything else; surfaced once as a warning.
    Unexpected,
}

/// Classify a close code.
///
/// `None` (the transport dropped without a close frame) is unexpected.
pub fn classify_close(code: Option<u16>) -> CloseSeverity {
    match code {
        Some(CLOSE_NORMAL | CLOSE_GOING_AWAY) => CloseSeverity::Expected,
        _ => CloseSeverity::Unexpected,
    }
}

/// Classification of a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Transient transport failure; reconnection is already in motion.
    Transport,
    /// Reconnection attempts are exhausted; live updates are off.
    CircuitBreaker,
}

/// An error surfaced to consumers. Always warning severity: none of these
/// stop the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ConnectionError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn circuit_breaker(attempts: u32) -> Self {
        Self {
            kind: ErrorKind::CircuitBreaker,
            message: format!(
                "Gave up reconnecting after {attempts} attempts; operating without live updates"
            ),
        }
    }
}
