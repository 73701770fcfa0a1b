//! Default endpoints for the chart datafeed.

/// Default REST API base URL serving `/api/ohlcv`.
pub const DEFAULT_API_URL: &str = "https://api.chartfeed.dev";

/// Default WebSocket URL for live price ticks.
pub const DEFAULT_WS_URL: &str = "wss://ws.chartfeed.dev/ws";
