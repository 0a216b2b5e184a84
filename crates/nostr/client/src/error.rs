//! Client error types

use crate::message::MessageError;
use std::time::Duration;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// The WebSocket did not open within the connect timeout
    #[error("Connection timeout after {0:?}")]
    ConnectionTimeout(Duration),

    /// WebSocket transport error (handshake failure, I/O, TLS)
    #[error("WebSocket error: {0}")]
    Transport(String),

    /// The socket closed while the operation was pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// No terminal frame arrived in time
    #[error("Request timeout after {0:?}")]
    RequestTimeout(Duration),

    /// Relay refused the event
    #[error("Event rejected: {0}")]
    Rejected(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Metadata (NIP-11) HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local or remote (NIP-46) signing failure
    #[error("Signer error: {0}")]
    Signer(#[from] nostr::SignerError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<MessageError> for ClientError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::Json(e) => ClientError::Serialization(e),
            other => ClientError::Internal(other.to_string()),
        }
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
