//! Chart widget boundary.
//!
//! [`ChartFeed`] exposes the five calls a charting widget makes against a
//! datafeed: `on_ready`, `resolve_symbol`, `get_bars`, `subscribe_bars` and
//! `unsubscribe_bars`. Callback-style widget APIs map onto these directly:
//! the return value is the success callback and `Err` is the error callback.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::ChartApiClient;
use crate::feed::aggregator::BarAggregator;
use crate::feed::config::{ChartFeedBuilder, FeedConfig};
use crate::feed::error::FeedResult;
use crate::feed::history::{HistoryFetcher, HistoryResult, OhlcvSource};
use crate::feed::live::{LiveHandle, LiveStream, LiveSubscriptions, TickCallback};
use crate::feed::supply::TotalSupply;
use crate::shared::price::{price_scale, FINE_DECIMALS, STANDARD_DECIMALS};
use crate::shared::{to_upstream_resolution, SymbolDescriptor};
use crate::websocket::{PriceSubscription, SocketRegistry};

/// Answer to `on_ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatafeedConfiguration {
    pub supported_resolutions: Vec<String>,
    pub supports_marks: bool,
    pub supports_timescale_marks: bool,
    pub supports_time: bool,
}

/// Display metadata for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    /// Full `BASE@UNIT#MODE` string
    pub name: String,
    pub ticker: String,
    pub description: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub listed_exchange: String,
    pub format: String,
    pub minmov: u32,
    pub pricescale: u64,
    pub has_intraday: bool,
    pub has_seconds: bool,
    pub seconds_multipliers: Vec<String>,
    pub has_daily: bool,
    pub supported_resolutions: Vec<String>,
    pub volume_precision: u32,
    pub data_status: String,
    /// Decimal places behind `pricescale`
    #[serde(skip)]
    pub decimals: u32,
    #[serde(skip)]
    pub descriptor: SymbolDescriptor,
}

/// Range requested by `get_bars`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodParams {
    /// Unix seconds
    pub from: i64,
    /// Unix seconds
    pub to: i64,
    #[serde(default)]
    pub count_back: u32,
    #[serde(default)]
    pub first_data_request: bool,
}

/// Streaming chart datafeed for one pair.
pub struct ChartFeed<S = ChartApiClient> {
    config: FeedConfig,
    history: HistoryFetcher<S>,
    registry: Arc<SocketRegistry>,
    supply: TotalSupply,
    live: LiveSubscriptions,
}

impl ChartFeed<ChartApiClient> {
    pub fn builder(pair_address: impl Into<String>) -> ChartFeedBuilder {
        ChartFeedBuilder::new(pair_address)
    }
}

impl<S: OhlcvSource> ChartFeed<S> {
    /// Assemble a feed from parts. `config` is taken as already validated.
    pub fn with_source(
        config: FeedConfig,
        source: S,
        registry: Arc<SocketRegistry>,
        supply: TotalSupply,
    ) -> Self {
        let history = HistoryFetcher::new(source, config.pair_address.clone(), supply.clone());
        Self {
            config,
            history,
            registry,
            supply,
            live: LiveSubscriptions::new(),
        }
    }

    pub fn on_ready(&self) -> DatafeedConfiguration {
        DatafeedConfiguration {
            supported_resolutions: self.resolution_tokens(),
            supports_marks: false,
            supports_timescale_marks: false,
            supports_time: true,
        }
    }

    /// Synthesize display metadata for `name`.
    ///
    /// Market-cap mode and low-value quote units get 12 decimals, everything
    /// else 6.
    pub fn resolve_symbol(&self, name: &str) -> SymbolInfo {
        let descriptor = SymbolDescriptor::parse(name);
        let decimals = if descriptor.mode.is_market_cap()
            || self.config.is_low_value_quote(descriptor.unit.as_str())
        {
            FINE_DECIMALS
        } else {
            STANDARD_DECIMALS
        };
        let resolutions = self.resolution_tokens();
        let has_seconds = resolutions.iter().any(|r| r.ends_with('S'));

        SymbolInfo {
            name: descriptor.to_string(),
            ticker: descriptor.to_string(),
            description: format!("{} / {} ({})", descriptor.base, descriptor.unit, descriptor.mode),
            type_: "crypto".to_string(),
            session: "24x7".to_string(),
            timezone: "Etc/UTC".to_string(),
            exchange: String::new(),
            listed_exchange: String::new(),
            format: "price".to_string(),
            minmov: 1,
            pricescale: price_scale(decimals),
            has_intraday: true,
            has_seconds,
            seconds_multipliers: if has_seconds { vec!["1".to_string()] } else { Vec::new() },
            has_daily: true,
            supported_resolutions: resolutions,
            volume_precision: 2,
            data_status: "streaming".to_string(),
            decimals,
            descriptor,
        }
    }

    /// Historical bars for `period`. Errors are meant for the widget's error
    /// callback; an unexpected response shape is an empty result instead.
    pub async fn get_bars(
        &self,
        symbol: &SymbolInfo,
        resolution: &str,
        period: PeriodParams,
    ) -> FeedResult<HistoryResult> {
        let result = self
            .history
            .fetch_history(
                &symbol.descriptor,
                resolution,
                period.from,
                period.to,
                period.count_back,
            )
            .await?;
        tracing::debug!(
            symbol = %symbol.name,
            resolution,
            from = period.from,
            to = period.to,
            bars = result.bars.len(),
            "History served"
        );
        Ok(result)
    }

    /// Start streaming bars for `symbol` to `on_tick`.
    ///
    /// Seeds from recent history (or a zero bar), then attaches to the shared
    /// socket for the configured URL. If the subscription is replaced or
    /// removed while seeding, the seed is discarded and nothing is attached.
    pub async fn subscribe_bars(
        &self,
        symbol: &SymbolInfo,
        resolution: &str,
        on_tick: TickCallback,
        subscriber_id: &str,
    ) -> FeedResult<()> {
        let generation = self
            .live
            .begin(subscriber_id, self.config.exclusive_subscriptions)
            .await;
        tracing::info!(subscriber_id, symbol = %symbol.name, resolution, generation, "Subscribing");

        let seed = self
            .history
            .fetch_seed(
                &symbol.descriptor,
                resolution,
                chrono::Utc::now().timestamp_millis(),
                self.config.seed_lookback_secs,
                self.config.seed_count_back,
            )
            .await;

        if !self.live.is_current(subscriber_id, generation).await {
            tracing::warn!(subscriber_id, generation, "Dropping stale seed");
            return Ok(());
        }

        let connection = match self.registry.get_connection(&self.config.ws_url).await {
            Ok(connection) => connection,
            Err(e) => {
                self.live.end_if(subscriber_id, generation).await;
                return Err(e.into());
            }
        };
        let (handler, rx) = connection.attach().await;

        let stream = LiveStream::new(
            subscriber_id,
            &self.config.pair_address,
            symbol.descriptor.mode,
            self.supply.clone(),
            BarAggregator::new(seed, resolution),
        );
        let task = tokio::spawn(stream.run(rx, on_tick));

        let subscription = PriceSubscription::new(
            &self.config.pair_address,
            to_upstream_resolution(resolution),
            symbol.descriptor.is_usd(),
        );
        if let Err(e) = connection.subscribe(handler, subscription).await {
            tracing::warn!(subscriber_id, error = %e, "Subscribe message not sent");
        }

        let handle = LiveHandle {
            connection,
            handler,
            task,
        };
        if let Err(handle) = self.live.activate(subscriber_id, generation, handle).await {
            tracing::warn!(subscriber_id, generation, "Subscription replaced while attaching");
            handle.teardown().await;
        }
        Ok(())
    }

    /// Stop streaming for `subscriber_id`. Unknown ids are ignored.
    pub async fn unsubscribe_bars(&self, subscriber_id: &str) {
        if self.live.end(subscriber_id).await {
            tracing::info!(subscriber_id, "Unsubscribed");
        }
    }

    /// Handle for pushing total supply updates.
    pub fn total_supply(&self) -> &TotalSupply {
        &self.supply
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SocketRegistry> {
        &self.registry
    }

    pub async fn active_subscriptions(&self) -> usize {
        self.live.len().await
    }

    fn resolution_tokens(&self) -> Vec<String> {
        self.config
            .supported_resolutions
            .iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResult, OhlcvParams, OhlcvPayload};
    use crate::feed::error::FeedError;
    use crate::feed::history::tests::FakeSource;
    use crate::shared::{Bar, PriceMode, QuoteUnit};
    use crate::websocket::client::ConnectionCommand;
    use crate::websocket::{SocketConnection, WebSocketError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    const WS: &str = "ws://feed.test/ws";

    type Harness<S> = (ChartFeed<S>, Arc<SocketConnection>, mpsc::Receiver<ConnectionCommand>);

    async fn feed_from<S: OhlcvSource>(config: FeedConfig, source: S) -> Harness<S> {
        let registry = Arc::new(SocketRegistry::default());
        let (conn, cmd_rx) = SocketConnection::detached(&config.ws_url, true);
        registry.insert(conn.clone()).await;
        let feed = ChartFeed::with_source(config, source, registry, TotalSupply::new(1_000_000.0));
        (feed, conn, cmd_rx)
    }

    fn test_config() -> FeedConfig {
        let mut config = FeedConfig::new("0xpair");
        config.ws_url = WS.to_string();
        config
    }

    async fn feed_with(responses: Vec<Result<serde_json::Value, u16>>) -> Harness<FakeSource> {
        feed_from(test_config(), FakeSource::with(responses)).await
    }

    /// Holds the first seed request until `release` is notified.
    #[derive(Default)]
    struct GatedSource {
        calls: AtomicUsize,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl OhlcvSource for GatedSource {
        async fn fetch_ohlcv(&self, _params: &OhlcvParams) -> ApiResult<OhlcvPayload> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(OhlcvPayload::Rows(Vec::new()))
        }
    }

    fn collector() -> (TickCallback, Arc<Mutex<Vec<Bar>>>) {
        let bars = Arc::new(Mutex::new(Vec::new()));
        let sink = bars.clone();
        let callback: TickCallback = Arc::new(move |bar| sink.lock().unwrap().push(bar));
        (callback, bars)
    }

    async fn wait_for(bars: &Arc<Mutex<Vec<Bar>>>, n: usize) {
        for _ in 0..100 {
            if bars.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} bars", n);
    }

    #[tokio::test]
    async fn test_on_ready() {
        let (feed, _, _) = feed_with(vec![]).await;
        let cfg = feed.on_ready();
        assert_eq!(cfg.supported_resolutions.len(), 9);
        assert_eq!(cfg.supported_resolutions[0], "1S");
        assert!(cfg.supports_time);
    }

    #[tokio::test]
    async fn test_resolve_symbol_precision() {
        let (feed, _, _) = feed_with(vec![]).await;

        let info = feed.resolve_symbol("NOOT@USD#PRICE");
        assert_eq!(info.pricescale, 1_000_000);
        assert_eq!(info.decimals, 6);
        assert_eq!(info.descriptor.unit, QuoteUnit::Usd);

        let info = feed.resolve_symbol("NOOT@USD#MCAP");
        assert_eq!(info.pricescale, 1_000_000_000_000);

        let info = feed.resolve_symbol("NOOT@WETH");
        assert_eq!(info.decimals, 12);
        assert_eq!(info.name, "NOOT@WETH#PRICE");

        let info = feed.resolve_symbol("NOOT");
        assert_eq!(info.name, "NOOT@USD#PRICE");
        assert_eq!(info.descriptor.mode, PriceMode::Price);
        assert!(info.has_seconds);
    }

    #[tokio::test]
    async fn test_get_bars() {
        let history = json!({"bars": [{"timestamp": 60, "close": 0.002}]});
        let (feed, _, _) = feed_with(vec![Ok(history)]).await;
        let symbol = feed.resolve_symbol("NOOT#MCAP");
        let period = PeriodParams {
            from: 0,
            to: 100,
            count_back: 5,
            first_data_request: true,
        };
        let result = feed.get_bars(&symbol, "1", period).await.unwrap();
        assert_eq!(result.bars.len(), 1);
        assert!((result.bars[0].close - 2000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_get_bars_error() {
        let (feed, _, _) = feed_with(vec![Err(502)]).await;
        let symbol = feed.resolve_symbol("NOOT");
        let result = feed.get_bars(&symbol, "1", PeriodParams::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_streams_bars() {
        let seed = json!([{"timestamp": 60, "open": 10, "high": 10, "low": 10, "close": 10}]);
        let (feed, conn, mut cmd_rx) = feed_with(vec![Ok(seed)]).await;
        let symbol = feed.resolve_symbol("NOOT@USD#PRICE");
        let (callback, bars) = collector();

        feed.subscribe_bars(&symbol, "1", callback, "sub-1").await.unwrap();

        match cmd_rx.try_recv().unwrap() {
            ConnectionCommand::Send { text, .. } => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                let expected = json!({
                    "type": "SUBSCRIBE_PRICE",
                    "data": { "resolution": "1m", "pair_address": "0xpair", "is_usd": true }
                });
                assert_eq!(value, expected);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let tick = json!({
            "data": {
                "timestamp": 120,
                "open": 10,
                "high": 11,
                "low": 9,
                "close": 10.5,
                "volume": 100
            }
        });
        conn.dispatch(&tick.to_string()).await;
        wait_for(&bars, 1).await;
        assert_eq!(
            bars.lock().unwrap()[0],
            Bar {
                start_time: 120_000,
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.5,
                volume: 100.0,
            }
        );
    }

    #[tokio::test]
    async fn test_seed_failure_still_goes_live() {
        let (feed, conn, _cmd_rx) = feed_with(vec![Err(500)]).await;
        let symbol = feed.resolve_symbol("NOOT");
        let (callback, bars) = collector();

        feed.subscribe_bars(&symbol, "1", callback, "sub-1").await.unwrap();
        assert_eq!(conn.handler_count().await, 1);

        let now_secs = chrono::Utc::now().timestamp();
        let tick = json!({
            "data": { "timestamp": now_secs + 120, "open": 1, "high": 1, "low": 1, "close": 1 }
        });
        conn.dispatch(&tick.to_string()).await;
        wait_for(&bars, 1).await;
        let bar = bars.lock().unwrap()[0];
        assert_eq!(bar.start_time % 60_000, 0);
        assert_eq!(bar.close, 1.0);
    }

    #[tokio::test]
    async fn test_new_subscriber_replaces_previous() {
        let (feed, conn, _cmd_rx) = feed_with(vec![]).await;
        let symbol = feed.resolve_symbol("NOOT");
        let (first, first_bars) = collector();
        let (second, second_bars) = collector();

        feed.subscribe_bars(&symbol, "1", first, "a").await.unwrap();
        feed.subscribe_bars(&symbol, "5", second, "b").await.unwrap();

        assert_eq!(feed.active_subscriptions().await, 1);
        assert_eq!(conn.handler_count().await, 1);
        assert_eq!(conn.subscription_count().await, 1);

        let now_secs = chrono::Utc::now().timestamp();
        conn.dispatch(&json!({"data": {"timestamp": now_secs, "close": 2}}).to_string()).await;
        wait_for(&second_bars, 1).await;
        assert!(first_bars.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches() {
        let (feed, conn, mut cmd_rx) = feed_with(vec![]).await;
        let symbol = feed.resolve_symbol("NOOT");
        let (callback, bars) = collector();

        feed.subscribe_bars(&symbol, "1", callback, "a").await.unwrap();
        feed.unsubscribe_bars("a").await;
        feed.unsubscribe_bars("unknown").await;

        assert_eq!(feed.active_subscriptions().await, 0);
        assert_eq!(conn.handler_count().await, 0);

        let mut last = None;
        while let Ok(ConnectionCommand::Send { text, .. }) = cmd_rx.try_recv() {
            last = Some(text);
        }
        assert_eq!(last.as_deref(), Some(r#"{"type":"UNSUBSCRIBE_PRICE"}"#));

        conn.dispatch(r#"{"data":{"timestamp":1,"close":1}}"#).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bars.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_market_cap_stream_follows_supply_updates() {
        let (feed, conn, _cmd_rx) = feed_with(vec![]).await;
        let symbol = feed.resolve_symbol("NOOT#MCAP");
        let (callback, bars) = collector();
        feed.subscribe_bars(&symbol, "1", callback, "a").await.unwrap();

        let now_secs = chrono::Utc::now().timestamp();
        let tick = json!({
            "data": {
                "timestamp": now_secs,
                "open": 0.002,
                "high": 0.002,
                "low": 0.002,
                "close": 0.002,
                "volume": 4
            }
        })
        .to_string();

        conn.dispatch(&tick).await;
        wait_for(&bars, 1).await;
        feed.total_supply().set(2_000_000.0);
        conn.dispatch(&tick).await;
        wait_for(&bars, 2).await;

        let bars = bars.lock().unwrap();
        assert!((bars[0].close - 2000.0).abs() < 1e-9);
        assert!((bars[1].close - 4000.0).abs() < 1e-9);
        assert_eq!(bars[1].volume, 4.0);
    }

    #[tokio::test]
    async fn test_shared_socket_routes_by_resolution() {
        let mut config = test_config();
        config.exclusive_subscriptions = false;
        let (feed, conn, _cmd_rx) = feed_from(config, FakeSource::with(vec![])).await;
        let symbol = feed.resolve_symbol("NOOT");
        let (one_cb, one_bars) = collector();
        let (five_cb, five_bars) = collector();

        feed.subscribe_bars(&symbol, "1", one_cb, "one").await.unwrap();
        feed.subscribe_bars(&symbol, "5", five_cb, "five").await.unwrap();
        assert_eq!(conn.handler_count().await, 2);

        let now_secs = chrono::Utc::now().timestamp();
        let five_tick = json!({
            "type": "PRICE_UPDATE",
            "data": {
                "pair_address": "0xpair",
                "resolution": "5m",
                "timestamp": now_secs,
                "close": 7,
                "volume": 999
            }
        });
        conn.dispatch(&five_tick.to_string()).await;
        wait_for(&five_bars, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(one_bars.lock().unwrap().is_empty());
        assert_eq!(five_bars.lock().unwrap()[0].volume, 999.0);

        let untagged = json!({"data": {"timestamp": now_secs, "close": 8}});
        conn.dispatch(&untagged.to_string()).await;
        wait_for(&one_bars, 1).await;
        wait_for(&five_bars, 2).await;
        assert_eq!(one_bars.lock().unwrap()[0].close, 8.0);
    }

    #[tokio::test]
    async fn test_unsubscribe_while_seeding_attaches_nothing() {
        let source = GatedSource::default();
        let entered = source.entered.clone();
        let release = source.release.clone();
        let (feed, conn, _cmd_rx) = feed_from(test_config(), source).await;
        let symbol = feed.resolve_symbol("NOOT");
        let (callback, _bars) = collector();

        let (subscribed, ()) = tokio::join!(
            feed.subscribe_bars(&symbol, "1", callback, "a"),
            async {
                entered.notified().await;
                feed.unsubscribe_bars("a").await;
                release.notify_one();
            }
        );

        assert!(subscribed.is_ok());
        assert_eq!(feed.active_subscriptions().await, 0);
        assert_eq!(conn.handler_count().await, 0);
        assert_eq!(conn.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_replacement_while_seeding_keeps_newer() {
        let source = GatedSource::default();
        let entered = source.entered.clone();
        let release = source.release.clone();
        let (feed, conn, _cmd_rx) = feed_from(test_config(), source).await;
        let symbol = feed.resolve_symbol("NOOT");
        let (first, _) = collector();
        let (second, _) = collector();

        let (a, b) = tokio::join!(feed.subscribe_bars(&symbol, "1", first, "a"), async {
            entered.notified().await;
            let b = feed.subscribe_bars(&symbol, "5", second, "b").await;
            release.notify_one();
            b
        });

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(feed.active_subscriptions().await, 1);
        assert!(feed.live.is_live("b").await);
        assert_eq!(conn.handler_count().await, 1);
        assert_eq!(conn.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_connection_failure_clears_own_entry() {
        let mut config = test_config();
        config.ws_url = "http://not-a-socket".to_string();
        let registry = Arc::new(SocketRegistry::default());
        let feed = ChartFeed::with_source(
            config,
            FakeSource::with(vec![]),
            registry,
            TotalSupply::default(),
        );
        let symbol = feed.resolve_symbol("NOOT");
        let (callback, _) = collector();

        let result = feed.subscribe_bars(&symbol, "1", callback, "a").await;
        assert!(matches!(
            result,
            Err(FeedError::Socket(WebSocketError::InvalidUrl(_)))
        ));
        assert_eq!(feed.active_subscriptions().await, 0);
    }
}
