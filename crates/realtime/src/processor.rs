//! WebSocket session loop.
//!
//! Reads frames from one live connection, answers heartbeat probes,
//! forwards parsed messages to consumers, and writes outbound payloads
//! queued while the session is open. Returns a [`SessionEnd`] describing
//! why the session stopped; the caller decides whether to reconnect.

use futures::{Sink, SinkExt, Stream, StreamExt};
use opsdash_core::types::epoch_millis;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::client::RealtimeClientError;
use crate::events::{ConnectionEvent, CLOSE_NORMAL};
use crate::messages::{parse_message, pong_frame};

/// Why a session stopped.
#[derive(Debug)]
pub struct SessionEnd {
    /// Close code from the peer's close frame, if one arrived.
    pub code: Option<u16>,
    pub reason: String,
    /// Transport error that ended the session, if any.
    pub error: Option<RealtimeClientError>,
    /// The session was stopped by `disconnect()`.
    pub cancelled: bool,
}

impl SessionEnd {
    fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            error: None,
            cancelled: false,
        }
    }

    fn failed(error: RealtimeClientError) -> Self {
        Self {
            code: None,
            reason: error.to_string(),
            error: Some(error),
            cancelled: false,
        }
    }
}

/// Drive a single WebSocket session until it closes, fails, or `cancel`
/// fires.
///
/// Text frames are handled in arrival order. A `ping` message is answered
/// with a `pong` on the same connection before the next frame is read.
/// Malformed frames are logged and dropped without closing the transport.
/// Binary frames are ignored.
pub async fn run_session<S>(
    ws_stream: S,
    connection_id: &str,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    event_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    cancel: &CancellationToken,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(connection_id, error = %e, "Close frame not delivered");
                }
                return SessionEnd {
                    code: Some(CLOSE_NORMAL),
                    reason: "client disconnect".to_string(),
                    error: None,
                    cancelled: true,
                };
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_text_frame(&text, connection_id, &mut sink, event_tx).await {
                        return SessionEnd::failed(RealtimeClientError::Protocol(e.to_string()));
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::trace!(connection_id, "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Protocol-level pings are answered by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(connection_id, ?frame, "Server closed push connection");
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return SessionEnd::closed(code, reason);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(connection_id, error = %e, "WebSocket receive error");
                    return SessionEnd::failed(RealtimeClientError::Protocol(e.to_string()));
                }
                None => {
                    return SessionEnd::closed(None, "stream exhausted");
                }
            },

            Some(payload) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(payload)).await {
                    tracing::warn!(connection_id, error = %e, "Failed to send payload");
                    return SessionEnd::failed(RealtimeClientError::Protocol(e.to_string()));
                }
            }
        }
    }
}

/// Handle one text frame: heartbeat reply, forward, or drop.
async fn handle_text_frame<K>(
    text: &str,
    connection_id: &str,
    sink: &mut K,
    event_tx: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Result<(), WsError>
where
    K: Sink<Message, Error = WsError> + Unpin,
{
    match parse_message(text) {
        Ok(msg) if msg.is_ping() => {
            tracing::trace!(connection_id, "Heartbeat ping, replying");
            sink.send(Message::Text(pong_frame(epoch_millis()))).await
        }
        Ok(msg) => {
            // A closed receiver only means nobody is listening any more.
            let _ = event_tx.send(ConnectionEvent::Message(msg));
            Ok(())
        }
        Err(e) => {
            tracing::warn!(
                connection_id,
                error = %e,
                raw_message = %text,
                "Dropping malformed push message",
            );
            Ok(())
        }
    }
}
