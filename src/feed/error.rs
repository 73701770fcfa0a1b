//! Errors surfaced at the chart boundary.

use thiserror::Error;

use crate::api::ApiError;
use crate::websocket::WebSocketError;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Historical bars could not be fetched or decoded
    #[error("Data fetch failed: {0}")]
    DataFetch(#[from] ApiError),

    /// Live socket could not be obtained
    #[error("Socket error: {0}")]
    Socket(#[from] WebSocketError),

    /// Feed was built with unusable settings
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ErrorResponse;

    #[test]
    fn test_from_api_error() {
        let err: FeedError = ApiError::ServerError(ErrorResponse::from_text("boom")).into();
        assert_eq!(err.to_string(), "Data fetch failed: Server error: boom");
    }

    #[test]
    fn test_from_ws_error() {
        let err: FeedError = WebSocketError::InvalidUrl("x".into()).into();
        assert!(matches!(err, FeedError::Socket(WebSocketError::InvalidUrl(_))));
    }
}
