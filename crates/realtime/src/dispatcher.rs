//! Type-based routing of push-connection messages.
//!
//! [`NotificationDispatcher`] consumes the [`ConnectionEvent`] stream of a
//! [`ConnectionManager`](crate::manager::ConnectionManager), decodes each
//! inbound message by its `type` tag, and hands it to the handlers
//! registered for that [`NotificationKind`]. Unknown and malformed
//! messages are logged and ignored; dispatch never panics on input.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::events::{ConnectionEvent, ErrorKind};
use crate::messages::{InboundMessage, Notification, NotificationKind};

/// Receives decoded notifications of the kinds it is registered for.
pub trait NotificationHandler: Send + Sync {
    fn handle(&self, notification: &Notification);
}

impl<F> NotificationHandler for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn handle(&self, notification: &Notification) {
        self(notification)
    }
}

/// How a single message was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to this many handlers.
    Delivered(NotificationKind, usize),
    /// Known kind, but no handler is registered for it.
    Unhandled(NotificationKind),
    /// The `type` tag is not part of the known vocabulary.
    Unknown(String),
    /// Known `type` whose `data` could not be decoded.
    Malformed(String),
}

/// Routes inbound messages to handlers by notification kind.
#[derive(Default)]
pub struct NotificationDispatcher {
    handlers: HashMap<NotificationKind, Vec<Box<dyn NotificationHandler>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Several handlers per kind are called
    /// in registration order.
    pub fn register<H>(&mut self, kind: NotificationKind, handler: H) -> &mut Self
    where
        H: NotificationHandler + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
        self
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: NotificationKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Classify and route a single message.
    pub fn dispatch(&self, msg: &InboundMessage) -> DispatchOutcome {
        let notification = match Notification::from_message(msg) {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                tracing::debug!(message_type = %msg.kind, "Ignoring unknown message type");
                return DispatchOutcome::Unknown(msg.kind.clone());
            }
            Err(e) => {
                tracing::warn!(
                    message_type = %msg.kind,
                    error = %e,
                    "Dropping notification with malformed data",
                );
                return DispatchOutcome::Malformed(msg.kind.clone());
            }
        };

        let kind = notification.kind();
        match self.handlers.get(&kind) {
            Some(handlers) if !handlers.is_empty() => {
                for handler in handlers {
                    handler.handle(&notification);
                }
                DispatchOutcome::Delivered(kind, handlers.len())
            }
            _ => {
                tracing::debug!(message_type = kind.tag(), "No handler registered");
                DispatchOutcome::Unhandled(kind)
            }
        }
    }

    /// Run the dispatch loop.
    ///
    /// Consumes connection events until the channel closes (i.e. the
    /// manager is dropped). Messages are dispatched in arrival order;
    /// lifecycle events are logged.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = receiver.recv().await {
            self.on_event(&event);
        }
        tracing::info!("Connection event channel closed, dispatcher shutting down");
    }

    /// Handle one connection event.
    pub fn on_event(&self, event: &ConnectionEvent) -> Option<DispatchOutcome> {
        match event {
            ConnectionEvent::Message(msg) => return Some(self.dispatch(msg)),
            ConnectionEvent::Opened { connection_id } => {
                tracing::info!(connection_id = %connection_id, "Live updates connected");
            }
            ConnectionEvent::Closed { code, severity, .. } => {
                tracing::debug!(?code, ?severity, "Live updates disconnected");
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Live updates reconnecting",
                );
            }
            ConnectionEvent::Error(error) => match error.kind {
                ErrorKind::CircuitBreaker => {
                    tracing::warn!(message = %error.message, "Operating without live updates");
                }
                ErrorKind::Transport => {
                    tracing::warn!(message = %error.message, "Live updates interrupted");
                }
            },
        }
        None
    }
}
