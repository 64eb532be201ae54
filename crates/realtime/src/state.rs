//! Connection state machine for the push connection.
//!
//! [`ConnectionMachine`] is a pure, synchronous model of the reconnect and
//! circuit-breaker policy. The async [`ConnectionManager`] feeds it
//! transport observations and acts on the decisions it returns, which
//! keeps the policy testable without a socket.
//!
//! [`ConnectionManager`]: crate::manager::ConnectionManager

use std::fmt;
use std::time::Duration;

use crate::reconnect::{delay_for_attempt, with_jitter, ReconnectConfig};

/// Primary state of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The transport is live.
    Open,
    /// No transport. A reconnection may be scheduled (see
    /// [`ConnectionSnapshot::reconnecting`]).
    Closed,
    /// The last transport failed. Held until the next attempt starts, an
    /// open, or a reset; [`ConnectionSnapshot::reconnecting`] tells whether
    /// a retry is pending.
    Error,
    /// Reconnection gave up. Sticky until an explicit disconnect.
    CircuitOpen,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::CircuitOpen => "circuit_open",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the connection for consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Failed attempts since the last successful open.
    pub attempt: u32,
    pub max_attempts: u32,
    /// A reconnection timer is pending.
    pub reconnecting: bool,
    /// Base delay between reconnection attempts.
    pub backoff_interval: Duration,
}

/// Result of asking the machine to start a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDecision {
    /// State moved to `Connecting`; the caller must open a transport.
    Proceed,
    /// Already open, connecting, or waiting on a scheduled reconnect.
    AlreadyActive,
    /// The circuit breaker is open; nothing happens until a reset.
    CircuitOpen,
}

/// What to do after the transport closed unexpectedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Nothing to schedule.
    Idle,
    /// Schedule exactly one reconnection after `delay`.
    Reconnect { attempt: u32, delay: Duration },
    /// Attempts are exhausted and the circuit just opened.
    CircuitOpened { attempts: u32 },
}

/// Reconnect and circuit-breaker policy as an explicit state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    reconnecting: bool,
    config: ReconnectConfig,
}

impl ConnectionMachine {
    /// A fresh machine in the `Closed` state with no attempts recorded.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            attempt: 0,
            reconnecting: false,
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// Only an open connection accepts outbound payloads.
    pub fn can_send(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            attempt: self.attempt,
            max_attempts: self.config.max_attempts,
            reconnecting: self.reconnecting,
            backoff_interval: self.config.initial_delay,
        }
    }

    /// Explicit `connect()` from a caller.
    pub fn begin_connect(&mut self) -> ConnectDecision {
        match self.state {
            ConnectionState::CircuitOpen => ConnectDecision::CircuitOpen,
            ConnectionState::Open | ConnectionState::Connecting => ConnectDecision::AlreadyActive,
            _ if self.reconnecting => ConnectDecision::AlreadyActive,
            _ => {
                self.state = ConnectionState::Connecting;
                ConnectDecision::Proceed
            }
        }
    }

    /// A scheduled reconnection timer fired.
    ///
    /// Returns `AlreadyActive` when no reconnection is pending any more
    /// (the timer is stale).
    pub fn fire_reconnect(&mut self) -> ConnectDecision {
        if !self.reconnecting {
            return ConnectDecision::AlreadyActive;
        }
        self.reconnecting = false;
        self.begin_connect()
    }

    /// The transport opened.
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Open;
        self.attempt = 0;
        self.reconnecting = false;
    }

    /// The transport reported an error. A close is expected to follow.
    pub fn on_error(&mut self) {
        if self.state != ConnectionState::CircuitOpen {
            self.state = ConnectionState::Error;
        }
    }

    /// The transport closed (or failed to open) without a caller asking.
    ///
    /// A preceding [`on_error`](Self::on_error) keeps the state at `Error`.
    pub fn on_unexpected_close(&mut self) -> CloseDecision {
        if self.state == ConnectionState::CircuitOpen {
            return CloseDecision::Idle;
        }

        if self.attempt < self.config.max_attempts {
            self.attempt += 1;
            if self.state != ConnectionState::Error {
                self.state = ConnectionState::Closed;
            }
            self.reconnecting = true;
            let delay = with_jitter(delay_for_attempt(self.attempt, &self.config), &self.config);
            CloseDecision::Reconnect {
                attempt: self.attempt,
                delay,
            }
        } else {
            self.state = ConnectionState::CircuitOpen;
            self.reconnecting = false;
            CloseDecision::CircuitOpened {
                attempts: self.attempt,
            }
        }
    }

    /// Full reset performed by `disconnect()`.
    ///
    /// Clears the attempt counter, any pending reconnection, and an open
    /// circuit.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Closed;
        self.attempt = 0;
        self.reconnecting = false;
    }
}
