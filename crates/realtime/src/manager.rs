//! Resilient push-connection manager.
//!
//! [`ConnectionManager`] owns one WebSocket to a single endpoint. It
//! spawns a task per connection attempt (connect -> process -> close),
//! feeds every transport observation through the [`ConnectionMachine`],
//! and schedules at most one reconnection timer per unexpected close
//! until the circuit breaker opens.
//!
//! Consumer-facing events are delivered in order on the unbounded
//! channel returned by [`ConnectionManager::new`].
//!
//! Every task belongs to a connection "epoch" identified by a
//! [`CancellationToken`]. [`ConnectionManager::disconnect`] cancels the
//! epoch, so a stale session or timer can never touch state after an
//! intentional teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::client::RealtimeClient;
use crate::events::{classify_close, CloseSeverity, ConnectionError, ConnectionEvent};
use crate::processor::{run_session, SessionEnd};
use crate::reconnect::ReconnectConfig;
use crate::state::{
    CloseDecision, ConnectDecision, ConnectionMachine, ConnectionSnapshot, ConnectionState,
};

/// Result of a [`ConnectionManager::connect`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection attempt was started.
    Started,
    /// Already open, connecting, or a reconnection is scheduled.
    AlreadyActive,
    /// The circuit breaker is open; call `disconnect()` to re-arm.
    CircuitOpen,
}

/// Manages the application's single push connection.
///
/// Created via [`ConnectionManager::new`]. The returned `Arc` can be
/// cheaply cloned into any task that needs to send or inspect state.
pub struct ConnectionManager {
    client: RealtimeClient,
    inner: Mutex<Inner>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Mutable state, only ever locked briefly and never across network I/O.
struct Inner {
    machine: ConnectionMachine,
    /// Outbound queue of the live session. `Some` only while open.
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Token shared by the current session and any pending timer.
    epoch: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager for `client` and return it with the event receiver.
    ///
    /// No connection is opened until [`connect`](Self::connect) is called.
    pub fn new(
        client: RealtimeClient,
        config: ReconnectConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            client,
            inner: Mutex::new(Inner {
                machine: ConnectionMachine::new(config),
                outbound: None,
                epoch: CancellationToken::new(),
            }),
            event_tx,
        });
        (manager, event_rx)
    }

    /// Start connecting.
    ///
    /// Idempotent: a call while open, while an attempt is in flight, or
    /// while a reconnection is scheduled does nothing. Refused while the
    /// circuit breaker is open.
    pub async fn connect(self: &Arc<Self>) -> ConnectOutcome {
        let epoch = {
            let mut inner = self.inner.lock().await;
            match inner.machine.begin_connect() {
                ConnectDecision::Proceed => inner.epoch.clone(),
                ConnectDecision::AlreadyActive => {
                    tracing::debug!(state = %inner.machine.state(), "Connect ignored, already active");
                    return ConnectOutcome::AlreadyActive;
                }
                ConnectDecision::CircuitOpen => {
                    tracing::debug!("Connect refused, circuit breaker is open");
                    return ConnectOutcome::CircuitOpen;
                }
            }
        };

        self.spawn_attempt(epoch);
        ConnectOutcome::Started
    }

    /// Tear the connection down and reset all reconnection state.
    ///
    /// Cancels any pending reconnection timer and the live session (which
    /// sends a close frame), resets `attempt` to 0, clears an open circuit
    /// and leaves the state `Closed`. Safe to call in any state.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.epoch.cancel();
        inner.epoch = CancellationToken::new();
        inner.outbound = None;
        let previous = inner.machine.state();
        inner.machine.reset();
        tracing::info!(previous_state = %previous, "Push connection disconnected");
    }

    /// Send a JSON payload on the live connection.
    ///
    /// Returns `false` when the connection is not open. Nothing is queued
    /// for later delivery.
    pub async fn send(&self, payload: &serde_json::Value) -> bool {
        let inner = self.inner.lock().await;
        if !inner.machine.can_send() {
            tracing::debug!(state = %inner.machine.state(), "Dropping send, connection not open");
            return false;
        }
        match &inner.outbound {
            Some(tx) => tx.send(payload.to_string()).is_ok(),
            None => false,
        }
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.lock().await.machine.snapshot()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.machine.state()
    }

    // ---- private helpers ----

    fn spawn_attempt(self: &Arc<Self>, epoch: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_attempt(epoch).await;
        });
    }

    /// One connection attempt: connect, run the session, handle the close.
    async fn run_attempt(self: Arc<Self>, epoch: CancellationToken) {
        let result = tokio::select! {
            _ = epoch.cancelled() => return,
            result = self.client.connect() => result,
        };

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(endpoint = %self.client.endpoint(), error = %e, "Connection attempt failed");
                let error = ConnectionError::transport(e.to_string());
                self.handle_close(&epoch, None, e.to_string(), Some(error))
                    .await;
                return;
            }
        };

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().await;
            if epoch.is_cancelled() {
                return;
            }
            inner.machine.on_open();
            inner.outbound = Some(out_tx);
        }
        self.emit(ConnectionEvent::Opened {
            connection_id: conn.connection_id.clone(),
        });

        let end = run_session(
            conn.ws_stream,
            &conn.connection_id,
            &mut out_rx,
            &self.event_tx,
            &epoch,
        )
        .await;

        tracing::info!(
            connection_id = %conn.connection_id,
            code = ?end.code,
            reason = %end.reason,
            "Push connection session ended",
        );
        self.handle_session_end(&epoch, end).await;
    }

    async fn handle_session_end(self: &Arc<Self>, epoch: &CancellationToken, end: SessionEnd) {
        if end.cancelled {
            self.emit(ConnectionEvent::Closed {
                code: end.code,
                reason: end.reason,
                severity: CloseSeverity::Expected,
            });
            return;
        }

        let error = end.error.map(|e| ConnectionError::transport(e.to_string()));
        self.handle_close(epoch, end.code, end.reason, error).await;
    }

    /// React to an unexpected close or failed attempt.
    ///
    /// Emits `Error` (when the close is not a normal one), then `Closed`,
    /// then either `Reconnecting` with exactly one timer scheduled, or a
    /// single `CircuitBreaker` error.
    async fn handle_close(
        self: &Arc<Self>,
        epoch: &CancellationToken,
        code: Option<u16>,
        reason: String,
        error: Option<ConnectionError>,
    ) {
        let decision = {
            let mut inner = self.inner.lock().await;
            if epoch.is_cancelled() {
                return;
            }
            inner.outbound = None;
            if error.is_some() {
                inner.machine.on_error();
            }
            inner.machine.on_unexpected_close()
        };

        let severity = if error.is_some() {
            CloseSeverity::Unexpected
        } else {
            classify_close(code)
        };

        match (severity, error) {
            (_, Some(error)) => self.emit(ConnectionEvent::Error(error)),
            (CloseSeverity::Unexpected, None) => {
                let message = match code {
                    Some(code) => format!("Connection closed with code {code}: {reason}"),
                    None => format!("Connection lost: {reason}"),
                };
                self.emit(ConnectionEvent::Error(ConnectionError::transport(message)));
            }
            (CloseSeverity::Expected, None) => {
                tracing::debug!(?code, "Connection closed normally");
            }
        }

        self.emit(ConnectionEvent::Closed {
            code,
            reason,
            severity,
        });

        match decision {
            CloseDecision::Reconnect { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnection",
                );
                self.emit(ConnectionEvent::Reconnecting { attempt, delay });
                self.schedule_reconnect(epoch.clone(), delay);
            }
            CloseDecision::CircuitOpened { attempts } => {
                tracing::warn!(
                    attempts,
                    "Reconnection attempts exhausted, circuit breaker open",
                );
                self.emit(ConnectionEvent::Error(ConnectionError::circuit_breaker(
                    attempts,
                )));
            }
            CloseDecision::Idle => {}
        }
    }

    /// Fire one reconnection attempt after `delay`, unless the epoch is
    /// cancelled first.
    fn schedule_reconnect(self: &Arc<Self>, epoch: CancellationToken, delay: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = epoch.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let decision = {
                let mut inner = manager.inner.lock().await;
                if epoch.is_cancelled() {
                    return;
                }
                inner.machine.fire_reconnect()
            };

            if decision == ConnectDecision::Proceed {
                manager.spawn_attempt(epoch);
            }
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.event_tx.send(event);
    }
}
