//! Socket error types.

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Clone, Error)]
pub enum WebSocketError {
    /// Handshake or transport setup failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code {code}, reason: {reason}")]
    Closed { code: u16, reason: String },

    /// Server closed with policy violation (1008)
    #[error("Rate limited by price socket")]
    RateLimited,

    /// Outbound request could not be serialized
    #[error("Failed to encode request: {0}")]
    Encode(String),

    #[error("Ping timeout: no pong received")]
    PingTimeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Socket already closed")]
    NotConnected,

    /// The connection task is not draining commands fast enough
    #[error("Command queue full")]
    QueueFull,

    /// The connection task has exited
    #[error("Connection task gone")]
    ChannelClosed,

    #[error("Invalid socket URL: {0}")]
    InvalidUrl(String),

    #[error("Handshake timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),
}

impl From<tungstenite::Error> for WebSocketError {
    fn from(err: tungstenite::Error) -> Self {
        use tungstenite::Error;
        match err {
            Error::ConnectionClosed => Self::Closed {
                code: 1000,
                reason: "normal closure".to_string(),
            },
            Error::AlreadyClosed => Self::NotConnected,
            Error::Io(e) => Self::Io(e.to_string()),
            Error::Url(e) => Self::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                Self::ConnectionFailed(format!("upgrade rejected with {}", resp.status()))
            }
            Error::HttpFormat(e) => Self::ConnectionFailed(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WebSocketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl<T> From<TrySendError<T>> for WebSocketError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::QueueFull,
            TrySendError::Closed(_) => Self::ChannelClosed,
        }
    }
}

pub type WsResult<T> = Result<T, WebSocketError>;
