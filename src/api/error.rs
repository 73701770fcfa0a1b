//! API error types for the OHLCV REST client.

use thiserror::Error;

/// Error type for the OHLCV REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP/network error from reqwest
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid request parameters (400)
    #[error("Bad request: {0}")]
    BadRequest(ErrorResponse),

    /// Missing or rejected credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(ErrorResponse),

    /// Permission denied (403)
    #[error("Permission denied: {0}")]
    Forbidden(ErrorResponse),

    /// Unknown pair or route (404)
    #[error("Not found: {0}")]
    NotFound(ErrorResponse),

    /// Conflicting request (409)
    #[error("Conflict: {0}")]
    Conflict(ErrorResponse),

    /// Too many requests (429)
    #[error("Rate limited: {0}")]
    RateLimited(ErrorResponse),

    /// Server-side error (5xx)
    #[error("Server error: {0}")]
    ServerError(ErrorResponse),

    /// JSON deserialization error
    #[error("Deserialization error: {0}")]
    Deserialize(String),

    /// Invalid parameter provided
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unexpected HTTP status code
    #[error("Unexpected status {0}: {1}")]
    UnexpectedStatus(u16, ErrorResponse),
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error body returned by the API.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ErrorResponse {
    /// Error status (usually "error")
    #[serde(default)]
    pub status: Option<String>,
    /// Human-readable error message
    #[serde(default, alias = "error")]
    pub message: Option<String>,
    /// Additional error details
    #[serde(default)]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Wrap a non-JSON body.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Default::default()
        }
    }

    /// Get the error message, preferring `message` over `details`.
    pub fn get_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.details.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.get_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_aliases() {
        let body: ErrorResponse =
            serde_json::from_str(r#"{"status":"error","error":"pair not found"}"#).unwrap();
        assert_eq!(body.get_message(), "pair not found");

        let body: ErrorResponse = serde_json::from_str(r#"{"details":"bad range"}"#).unwrap();
        assert_eq!(body.get_message(), "bad range");

        let body: ErrorResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(body.get_message(), "Unknown error");
    }

    #[test]
    fn test_display() {
        let err = ApiError::NotFound(ErrorResponse::from_text("no such pair"));
        assert_eq!(err.to_string(), "Not found: no such pair");
    }
}
