//! Resilient push-connection client and notification dispatch.
//!
//! Provides typed message parsing, an explicit connection state machine
//! with bounded reconnection and a circuit breaker, the WebSocket session
//! loop (including heartbeat replies), the [`ConnectionManager`] that
//! drives it all, and the [`NotificationDispatcher`] that routes inbound
//! messages to registered handlers by `type`.

pub mod client;
pub mod dispatcher;
pub mod events;
pub mod manager;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod state;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher, NotificationHandler};
pub use events::{CloseSeverity, ConnectionError, ConnectionEvent, ErrorKind};
pub use manager::{ConnectOutcome, ConnectionManager};
pub use messages::{InboundMessage, Notification, NotificationKind};
pub use reconnect::ReconnectConfig;
pub use state::{ConnectionSnapshot, ConnectionState};
