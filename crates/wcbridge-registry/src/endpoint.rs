//! Endpoint identifiers

use crate::error::{BridgeError, BridgeResult};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Opaque key for one peer connection target
///
/// Wraps the socket URL. Two endpoints are equal iff their URLs are equal
/// after parsing, so `wss://Bridge.example.com` and `wss://bridge.example.com/`
/// name the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(Url);

impl Endpoint {
    /// Wrap a WebSocket URL (`ws` or `wss`)
    pub fn new(url: Url) -> BridgeResult<Self> {
        match url.scheme() {
            "ws" | "wss" => Ok(Self(url)),
            other => Err(BridgeError::InvalidEndpoint(format!(
                "unsupported scheme '{}' in {}",
                other, url
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for Endpoint {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url =
            Url::parse(s).map_err(|e| BridgeError::InvalidEndpoint(format!("{}: {}", s, e)))?;
        Self::new(url)
    }
}

impl TryFrom<Url> for Endpoint {
    type Error = BridgeError;

    fn try_from(url: Url) -> Result<Self, Self::Error> {
        Self::new(url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}
