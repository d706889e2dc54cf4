//! Client error types.

use duorpc_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("call has no further follow-ups")]
    ChainClosed,

    #[error("server error: {message}")]
    Server { message: String },
}

impl ClientError {
    /// Returns whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Ws(_) | ClientError::ConnectionClosed => true,
            ClientError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}
