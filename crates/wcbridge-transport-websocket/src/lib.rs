//! WebSocket socket implementation using tokio-tungstenite
//!
//! Provides the production [`SocketConnector`](wcbridge_transport::SocketConnector)
//! for the bridge. Each connection attempt runs as a single tokio task that
//! owns the WebSocket stream, so the events it reports for one endpoint are
//! strictly ordered.
//!
//! # Features
//!
//! - **Encryption**: TLS via rustls (wss://), plain ws:// for local relays
//! - **Keep-alive**: periodic ping frames, configurable or disabled
//! - **Text only**: text frames are delivered as-is, UTF-8 binary frames are
//!   promoted to text, everything else is dropped

pub mod config;
pub mod connector;
pub mod socket;

pub use config::WebSocketConfig;
pub use connector::WebSocketConnector;
pub use socket::WebSocketSocket;
