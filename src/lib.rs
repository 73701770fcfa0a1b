//! # chartfeed
//!
//! Real-time OHLCV chart datafeed: historical bars over REST, live ticks over
//! a shared WebSocket, aggregated into bars on the client.
//!
//! ## Modules
//!
//! - [`feed`]: The datafeed itself (`on_ready`, `resolve_symbol`, `get_bars`,
//!   `subscribe_bars`, `unsubscribe_bars`)
//! - [`api`]: REST client for the OHLCV history endpoint
//! - [`websocket`]: Shared socket connections with handler fan-out and
//!   automatic reconnect
//!
//! Plus a shared module:
//! - [`shared`]: Resolution calculus, bar types and payload normalization
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chartfeed::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let feed = ChartFeed::builder("0xpair").build()?;
//!
//!     let symbol = feed.resolve_symbol("NOOT@WETH#MCAP");
//!     feed.total_supply().set(1_000_000_000.0);
//!
//!     let now = chrono::Utc::now().timestamp();
//!     let history = feed
//!         .get_bars(&symbol, "15", PeriodParams { from: now - 86_400, to: now, count_back: 96, first_data_request: true })
//!         .await?;
//!     println!("{} bars", history.bars.len());
//!
//!     feed.subscribe_bars(&symbol, "15", Arc::new(|bar| println!("{:?}", bar)), "main")
//!         .await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Resolution calculus, bar types and payload normalization.
pub mod shared;

/// Default endpoint URLs.
pub mod network;

/// REST client for historical OHLCV bars.
#[cfg(feature = "api")]
pub mod api;

/// Shared WebSocket connections for live price ticks.
#[cfg(feature = "websocket")]
pub mod websocket;

/// Chart datafeed built on the REST client and the socket layer.
#[cfg(all(feature = "api", feature = "websocket"))]
pub mod feed;

// ============================================================================
// PRELUDE
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use chartfeed::prelude::*;
/// ```
pub mod prelude {
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_WS_URL};

    pub use crate::shared::{
        bucket_width_ms, next_boundary, to_upstream_resolution, Bar, PriceMode, QuoteUnit,
        Resolution, SymbolDescriptor, Tick,
    };

    #[cfg(feature = "api")]
    pub use crate::api::{
        ApiError, ApiResult, ChartApiClient, ChartApiClientBuilder, OhlcvParams, OhlcvPayload,
        RetryConfig,
    };

    #[cfg(feature = "websocket")]
    pub use crate::websocket::{
        ConnectionEvent, ConnectionState, PriceSubscription, SocketConnection, SocketRegistry,
        WebSocketConfig, WebSocketError, WsResult,
    };

    #[cfg(all(feature = "api", feature = "websocket"))]
    pub use crate::feed::{
        ChartFeed, ChartFeedBuilder, DatafeedConfiguration, FeedConfig, FeedError, FeedResult,
        HistoryResult, PeriodParams, SymbolInfo, TickCallback, TotalSupply,
    };
}
