//! Streaming chart datafeed.
//!
//! Ties the REST history endpoint and the shared price socket together behind
//! the datafeed calls a charting widget makes.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chartfeed::feed::{ChartFeed, PeriodParams};
//!
//! let feed = ChartFeed::builder("0xpair")
//!     .api_url("https://api.example.com")
//!     .ws_url("wss://ws.example.com/ws")
//!     .build()?;
//!
//! let symbol = feed.resolve_symbol("NOOT@USD#PRICE");
//! let history = feed
//!     .get_bars(&symbol, "5", PeriodParams { from, to, count_back: 300, first_data_request: true })
//!     .await?;
//!
//! feed.subscribe_bars(&symbol, "5", Arc::new(|bar| println!("{:?}", bar)), "main")
//!     .await?;
//! ```
//!
//! In market-cap mode (`#MCAP`) prices are multiplied by the current total
//! supply at emission time. Push supply updates through
//! [`ChartFeed::total_supply`].

pub mod adapter;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod history;
pub mod live;
pub mod supply;

pub use adapter::{ChartFeed, DatafeedConfiguration, PeriodParams, SymbolInfo};
pub use aggregator::{BarAggregator, TickOutcome};
pub use config::{ChartFeedBuilder, FeedConfig};
pub use error::{FeedError, FeedResult};
pub use history::{HistoryFetcher, HistoryResult, OhlcvSource};
pub use live::{LiveHandle, LiveStream, LiveSubscriptions, TickCallback};
pub use supply::TotalSupply;
