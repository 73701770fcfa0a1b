//! REST client for the historical OHLCV endpoint.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chartfeed::api::{ChartApiClient, OhlcvParams, RetryConfig};
//! use std::time::Duration;
//!
//! let client = ChartApiClient::builder("https://api.example.com")
//!     .timeout(Duration::from_secs(10))
//!     .with_retry(RetryConfig::new(3))
//!     .build()?;
//!
//! let params = OhlcvParams::new("0xpair", "5m")
//!     .with_time_range(1_700_000_000, 1_700_003_600)
//!     .with_usd(true);
//! let payload = client.get_ohlcv(&params).await?;
//! ```
//!
//! # Error Handling
//!
//! All methods return `ApiResult<T>`, an alias for `Result<T, ApiError>`:
//!
//! ```rust,ignore
//! match client.get_ohlcv(&params).await {
//!     Ok(payload) => println!("{} rows", payload.rows().len()),
//!     Err(ApiError::NotFound(body)) => println!("Unknown pair: {}", body),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```

pub mod client;
pub mod error;
pub mod types;

pub use client::{ChartApiClient, ChartApiClientBuilder, RetryConfig};
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use types::*;
