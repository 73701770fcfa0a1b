//! Feed configuration and builder.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{ChartApiClient, RetryConfig};
use crate::feed::adapter::ChartFeed;
use crate::feed::error::{FeedError, FeedResult};
use crate::feed::supply::TotalSupply;
use crate::network::{DEFAULT_API_URL, DEFAULT_WS_URL};
use crate::shared::Resolution;
use crate::websocket::{SocketRegistry, WebSocketConfig};

/// Default lookback window for the seed bar (seconds).
pub const DEFAULT_SEED_LOOKBACK_SECS: i64 = 3600;

/// Default `count_back` sent with the seed query.
pub const DEFAULT_SEED_COUNT_BACK: u32 = 300;

/// Default request timeout for history queries (seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub api_url: String,
    pub ws_url: String,
    pub pair_address: String,
    /// Quote units shown with fine precision, upper-case
    pub low_value_quotes: Vec<String>,
    pub seed_lookback_secs: i64,
    pub seed_count_back: u32,
    pub supported_resolutions: Vec<Resolution>,
    /// A new subscription tears down every other one
    pub exclusive_subscriptions: bool,
    pub websocket: WebSocketConfig,
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl FeedConfig {
    pub fn new(pair_address: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            pair_address: pair_address.into(),
            low_value_quotes: vec!["WETH".to_string()],
            seed_lookback_secs: DEFAULT_SEED_LOOKBACK_SECS,
            seed_count_back: DEFAULT_SEED_COUNT_BACK,
            supported_resolutions: Resolution::ALL.to_vec(),
            exclusive_subscriptions: true,
            websocket: WebSocketConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.pair_address.trim().is_empty() {
            return Err(FeedError::InvalidConfig("pair address is empty".to_string()));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(FeedError::InvalidConfig(format!(
                "websocket url must be ws:// or wss://, got {}",
                self.ws_url
            )));
        }
        if self.seed_lookback_secs <= 0 {
            return Err(FeedError::InvalidConfig(
                "seed lookback must be positive".to_string(),
            ));
        }
        if self.supported_resolutions.is_empty() {
            return Err(FeedError::InvalidConfig(
                "at least one resolution must be supported".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `unit` is one of the configured low-value quotes.
    pub fn is_low_value_quote(&self, unit: &str) -> bool {
        self.low_value_quotes
            .iter()
            .any(|q| q.eq_ignore_ascii_case(unit))
    }
}

/// Builder for [`ChartFeed`] backed by the REST client.
#[derive(Debug, Clone)]
pub struct ChartFeedBuilder {
    config: FeedConfig,
    supply: Option<TotalSupply>,
    registry: Option<Arc<SocketRegistry>>,
}

impl ChartFeedBuilder {
    pub fn new(pair_address: impl Into<String>) -> Self {
        Self {
            config: FeedConfig::new(pair_address),
            supply: None,
            registry: None,
        }
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = url.into();
        self
    }

    /// Replace the low-value quote list.
    pub fn low_value_quotes<I, T>(mut self, quotes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.config.low_value_quotes = quotes
            .into_iter()
            .map(|q| q.into().to_ascii_uppercase())
            .collect();
        self
    }

    pub fn seed_lookback_secs(mut self, secs: i64) -> Self {
        self.config.seed_lookback_secs = secs;
        self
    }

    pub fn seed_count_back(mut self, count: u32) -> Self {
        self.config.seed_count_back = count;
        self
    }

    pub fn supported_resolutions(mut self, resolutions: Vec<Resolution>) -> Self {
        self.config.supported_resolutions = resolutions;
        self
    }

    pub fn exclusive_subscriptions(mut self, exclusive: bool) -> Self {
        self.config.exclusive_subscriptions = exclusive;
        self
    }

    pub fn websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.config.websocket = config;
        self
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Share a supply handle with the caller, for market-cap mode.
    pub fn total_supply(mut self, supply: TotalSupply) -> Self {
        self.supply = Some(supply);
        self
    }

    /// Use an application-owned socket registry.
    pub fn registry(mut self, registry: Arc<SocketRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn build(self) -> FeedResult<ChartFeed<ChartApiClient>> {
        self.config.validate()?;

        let client = ChartApiClient::builder(&self.config.api_url)
            .timeout(self.config.request_timeout)
            .with_retry(self.config.retry.clone())
            .build()?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SocketRegistry::new(self.config.websocket.clone())));

        Ok(ChartFeed::with_source(
            self.config,
            client,
            registry,
            self.supply.unwrap_or_default(),
        ))
    }
}
