//! Bridge errors

use crate::endpoint::Endpoint;
use thiserror::Error;
use wcbridge_transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// No open connection exists for the endpoint
    #[error("Not connected to {0}")]
    NotConnected(Endpoint),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
