//! OHLCV REST client implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use chartfeed::api::{ChartApiClient, OhlcvParams};
//!
//! let client = ChartApiClient::new("https://api.example.com")?;
//! let params = OhlcvParams::new("0xpair", "1m").with_time_range(from, to);
//! let payload = client.get_ohlcv(&params).await?;
//! println!("{} rows", payload.rows().len());
//! ```

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::api::types::*;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retry configuration for the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = disabled)
    pub max_retries: u32,
    /// Base delay before first retry (ms)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (ms)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given max retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Exponential backoff, capped, then 75-100% jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1 << attempt.min(10));
        let capped_delay = exp_delay.min(self.max_delay_ms);
        let jitter_range = capped_delay / 4;
        let jitter = rand::random::<u64>() % (jitter_range + 1);
        Duration::from_millis(capped_delay - jitter_range + jitter)
    }
}

/// Builder for configuring [`ChartApiClient`].
#[derive(Debug, Clone)]
pub struct ChartApiClientBuilder {
    base_url: String,
    timeout: Duration,
    default_headers: Vec<(String, String)>,
    retry_config: RetryConfig,
}

impl ChartApiClientBuilder {
    /// Create a new builder with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            default_headers: Vec::new(),
            retry_config: RetryConfig::default(),
        }
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Add a default header to all requests.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Enable retries with exponential backoff.
    ///
    /// # Arguments
    ///
    /// * `config` - Retry configuration (use `RetryConfig::new(3)` for 3 retries with defaults)
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Build the client.
    pub fn build(self) -> ApiResult<ChartApiClient> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        for (name, value) in self.default_headers {
            let header_name = reqwest::header::HeaderName::try_from(name.as_str()).map_err(|e| {
                ApiError::InvalidParameter(format!("Invalid header name '{}': {}", name, e))
            })?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|e| {
                ApiError::InvalidParameter(format!("Invalid header value for '{}': {}", name, e))
            })?;
            headers.insert(header_name, header_value);
        }

        let http_client = Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(10)
            .default_headers(headers)
            .build()?;

        Ok(ChartApiClient {
            http_client,
            base_url: self.base_url,
            retry_config: self.retry_config,
        })
    }
}

/// REST client for the historical OHLCV endpoint.
#[derive(Debug, Clone)]
pub struct ChartApiClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl ChartApiClient {
    /// Create a client with default settings.
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        ChartApiClientBuilder::new(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> ChartApiClientBuilder {
        ChartApiClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    // =========================================================================
    // Request plumbing
    // =========================================================================

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        self.execute_with_retry(|| self.http_client.get(url).send())
            .await
    }

    /// Run `request_fn` until it succeeds, fails for good, or the retry
    /// budget is spent. Connect errors, timeouts, 5xx and 429 are retried.
    async fn execute_with_retry<T, F, Fut>(&self, request_fn: F) -> ApiResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
        T: serde::de::DeserializeOwned,
    {
        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;

        loop {
            let (error, retryable) = match request_fn().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<T>().await.map_err(|e| {
                        ApiError::Deserialize(format!("OHLCV body is not valid JSON: {}", e))
                    });
                }
                Ok(response) => {
                    let retryable = Self::is_retryable_status(response.status());
                    (Self::parse_error_response(response).await, retryable)
                }
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout() || e.is_request();
                    (ApiError::Http(e), retryable)
                }
            };

            if !retryable || attempt >= max_retries {
                return Err(error);
            }

            let delay = self.retry_config.delay_for_attempt(attempt);
            attempt += 1;
            tracing::debug!(
                attempt,
                max_retries,
                delay_ms = delay.as_millis(),
                error = %error,
                "Retrying OHLCV request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn parse_error_response(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let body = response.text().await.unwrap_or_else(|e| {
            tracing::warn!(status = %status, error = %e, "Unreadable error body");
            String::new()
        });

        let error_response = if body.trim().is_empty() {
            ErrorResponse::from_text(format!("HTTP {}", status))
        } else {
            serde_json::from_str::<ErrorResponse>(&body)
                .unwrap_or_else(|_| ErrorResponse::from_text(body))
        };

        Self::map_status_error(status, error_response)
    }

    fn map_status_error(status: StatusCode, response: ErrorResponse) -> ApiError {
        match status {
            StatusCode::BAD_REQUEST => ApiError::BadRequest(response),
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized(response),
            StatusCode::FORBIDDEN => ApiError::Forbidden(response),
            StatusCode::NOT_FOUND => ApiError::NotFound(response),
            StatusCode::CONFLICT => ApiError::Conflict(response),
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(response),
            _ if status.is_server_error() => ApiError::ServerError(response),
            _ => ApiError::UnexpectedStatus(status.as_u16(), response),
        }
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    fn validate_params(params: &OhlcvParams) -> ApiResult<()> {
        if params.pair_address.trim().is_empty() {
            return Err(ApiError::InvalidParameter(
                "pair_address cannot be empty".to_string(),
            ));
        }
        if params.resolution.trim().is_empty() {
            return Err(ApiError::InvalidParameter(
                "resolution cannot be empty".to_string(),
            ));
        }
        if params.from > params.to {
            return Err(ApiError::InvalidParameter(format!(
                "from ({}) must not be after to ({})",
                params.from, params.to
            )));
        }
        Ok(())
    }

    /// Build the full request URL for an OHLCV query.
    pub fn ohlcv_url(&self, params: &OhlcvParams) -> ApiResult<String> {
        let query = serde_urlencoded::to_string(params)
            .map_err(|e| ApiError::InvalidParameter(format!("Unencodable query: {}", e)))?;
        Ok(format!("{}/api/ohlcv?{}", self.base_url, query))
    }

    // =========================================================================
    // OHLCV endpoint
    // =========================================================================

    /// Fetch historical OHLCV rows.
    ///
    /// The payload is returned as the server sent it. Row normalization
    /// happens in [`crate::shared::normalize_row`].
    pub async fn get_ohlcv(&self, params: &OhlcvParams) -> ApiResult<OhlcvPayload> {
        Self::validate_params(params)?;
        let url = self.ohlcv_url(params)?;
        tracing::debug!(
            pair = %params.pair_address,
            resolution = %params.resolution,
            from = params.from,
            to = params.to,
            "Fetching OHLCV history"
        );
        self.get(&url).await
    }
}
