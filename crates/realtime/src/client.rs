//! WebSocket client for the notification endpoint.
//!
//! [`RealtimeClient`] holds the endpoint configuration. Call
//! [`RealtimeClient::connect`] to establish a live
//! [`RealtimeConnection`].

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound on TCP connect plus the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The raw WebSocket stream type used by sessions.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the push endpoint.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    endpoint: String,
    connect_timeout: Duration,
}

/// A live WebSocket connection.
pub struct RealtimeConnection {
    /// Identifier generated per connection, used to correlate log lines.
    pub connection_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl RealtimeClient {
    /// Create a client targeting `endpoint`, e.g. `ws://host/ws/notifications`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a WebSocket to the endpoint.
    ///
    /// Fails with [`RealtimeClientError::Connection`] when the handshake does
    /// not complete within the connect timeout.
    pub async fn connect(&self) -> Result<RealtimeConnection, RealtimeClientError> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.endpoint.as_str()))
                .await
                .map_err(|_| {
                    RealtimeClientError::Connection(format!(
                        "Timed out connecting to {} after {}ms",
                        self.endpoint,
                        self.connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| {
                    RealtimeClientError::Connection(format!(
                        "Failed to connect to {}: {e}",
                        self.endpoint
                    ))
                })?;

        tracing::info!(
            connection_id = %connection_id,
            endpoint = %self.endpoint,
            "Push connection established",
        );

        Ok(RealtimeConnection {
            connection_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
