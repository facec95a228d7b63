//! Connection registry for the bridge transport
//!
//! Keeps at most one live socket per endpoint and routes outbound text and
//! inbound connect/disconnect/text events between callers and those sockets.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wcbridge_registry::{Bridge, Endpoint, ListenCallbacks, Transport};
//! # fn demo(connector: Arc<dyn wcbridge_transport::SocketConnector>) -> wcbridge_registry::BridgeResult<()> {
//! let bridge = Bridge::new(connector);
//! let endpoint: Endpoint = "wss://bridge.example.com".parse()?;
//!
//! bridge.listen(
//!     &endpoint,
//!     ListenCallbacks::new(
//!         |endpoint: &Endpoint| println!("connected to {}", endpoint),
//!         |endpoint: &Endpoint, error| println!("disconnected from {}: {:?}", endpoint, error),
//!         |text, _: &Endpoint| println!("received {}", text),
//!     ),
//! );
//! bridge.send(&endpoint, "hello".to_string())?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod registry;

pub use connection::{ConnectionHandlers, ConnectionId, ManagedConnection};
pub use endpoint::Endpoint;
pub use error::{BridgeError, BridgeResult};
pub use registry::{Bridge, ListenCallbacks};

/// Operations the pairing layer uses to talk to peers
pub trait Transport: Send + Sync {
    /// Send `text` over the open connection for `endpoint`
    ///
    /// Fails with [`BridgeError::NotConnected`] when there is no record for
    /// the endpoint or it is not open. Nothing is transmitted in that case.
    fn send(&self, endpoint: &Endpoint, text: String) -> BridgeResult<()>;

    /// Register `callbacks` for `endpoint` and make sure it is connecting
    ///
    /// Reuses an existing record if there is one, in which case `callbacks`
    /// are dropped. Never opens a second socket for an endpoint that is
    /// already connecting or open.
    fn listen(&self, endpoint: &Endpoint, callbacks: ListenCallbacks);

    /// True iff a record exists for `endpoint` and it is open
    fn is_connected(&self, endpoint: &Endpoint) -> bool;

    /// Request closure of the connection for `endpoint`
    ///
    /// The record is removed when the socket reports disconnection, not here.
    fn disconnect(&self, endpoint: &Endpoint) -> BridgeResult<()>;
}
