//! Socket primitive boundary for the bridge
//!
//! The registry never talks to a concrete socket library. It drives sockets
//! through the three traits in this crate:
//!
//! - [`SocketConnector`] starts a connection attempt for a URL and returns a handle
//! - [`Socket`] is that handle: send text, request closure
//! - [`SocketHandler`] receives the socket's events
//!
//! Every socket reports its lifecycle as a sequence of [`SocketEvent`]s:
//! `Connected`, then zero or more `Text`, then exactly one `Disconnected`.
//! A socket that fails to connect skips straight to `Disconnected(Some(err))`.

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Socket is not open")]
    NotOpen,

    #[error("Timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("TLS error: {0}")]
    TlsError(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Lifecycle and data events produced by a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connection attempt succeeded
    Connected,
    /// The socket is gone. `None` for a clean close.
    Disconnected(Option<TransportError>),
    /// A text payload arrived
    Text(String),
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketEvent::Connected => write!(f, "connected"),
            SocketEvent::Disconnected(None) => write!(f, "disconnected"),
            SocketEvent::Disconnected(Some(e)) => write!(f, "disconnected ({})", e),
            SocketEvent::Text(text) => write!(f, "text ({} bytes)", text.len()),
        }
    }
}

/// Receiver of socket events
///
/// Called from whatever execution context the socket implementation uses.
/// Implementations must not assume they run on the caller's thread.
pub trait SocketHandler: Send + Sync {
    fn on_event(&self, event: SocketEvent);
}

impl<F> SocketHandler for F
where
    F: Fn(SocketEvent) + Send + Sync,
{
    fn on_event(&self, event: SocketEvent) {
        self(event)
    }
}

/// Handle to one live socket
pub trait Socket: Send + Sync {
    /// Queue a text payload for transmission
    ///
    /// Fails with [`TransportError::NotOpen`] unless the socket has reported
    /// `Connected` and has not yet reported `Disconnected`.
    fn send_text(&self, text: String) -> TransportResult<()>;

    /// Request graceful closure
    ///
    /// Returns immediately. The socket later reports `Disconnected`.
    fn close(&self);

    /// Identifier used in logs
    fn socket_id(&self) -> String;
}

/// Factory that starts connection attempts
pub trait SocketConnector: Send + Sync + fmt::Debug {
    /// Start connecting to `url`
    ///
    /// Does not wait for the connection to complete. The outcome is delivered
    /// to `handler` as either `Connected` or `Disconnected(Some(err))`.
    /// An `Err` here means no attempt was started and no events will follow.
    fn connect(&self, url: &Url, handler: Arc<dyn SocketHandler>)
        -> TransportResult<Arc<dyn Socket>>;

    /// Connector name for logging
    fn name(&self) -> &str;
}
