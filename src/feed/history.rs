//! Historical bars.
//!
//! Fetches OHLCV rows for a pair, normalizes them into [`Bar`]s sorted by
//! start time, and presents them in the symbol's price mode.

use std::future::Future;

use serde::Serialize;

use crate::api::{ApiResult, ChartApiClient, OhlcvParams, OhlcvPayload};
use crate::feed::supply::TotalSupply;
use crate::shared::{
    align_to_bucket, bucket_width_ms, normalize_row, to_upstream_resolution, Bar,
    SymbolDescriptor,
};

/// Anything that can answer an OHLCV query.
pub trait OhlcvSource: Send + Sync {
    fn fetch_ohlcv(
        &self,
        params: &OhlcvParams,
    ) -> impl Future<Output = ApiResult<OhlcvPayload>> + Send;
}

impl OhlcvSource for ChartApiClient {
    async fn fetch_ohlcv(&self, params: &OhlcvParams) -> ApiResult<OhlcvPayload> {
        self.get_ohlcv(params).await
    }
}

/// Bars handed to the chart for one history request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResult {
    pub bars: Vec<Bar>,
    /// True iff `bars` is empty
    pub no_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_time: Option<i64>,
}

impl HistoryResult {
    fn new(bars: Vec<Bar>, next_time: Option<i64>) -> Self {
        Self {
            no_data: bars.is_empty(),
            bars,
            next_time,
        }
    }
}

#[derive(Debug)]
pub struct HistoryFetcher<S> {
    source: S,
    pair_address: String,
    supply: TotalSupply,
}

impl<S: OhlcvSource> HistoryFetcher<S> {
    pub fn new(source: S, pair_address: impl Into<String>, supply: TotalSupply) -> Self {
        Self {
            source,
            pair_address: pair_address.into(),
            supply,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn pair_address(&self) -> &str {
        &self.pair_address
    }

    /// Bars for `[range_start, range_end]` (unix seconds), presented in the
    /// symbol's mode.
    pub async fn fetch_history(
        &self,
        symbol: &SymbolDescriptor,
        resolution: &str,
        range_start: i64,
        range_end: i64,
        count_back: u32,
    ) -> ApiResult<HistoryResult> {
        let (bars, next_time) = self
            .fetch_raw(symbol, resolution, range_start, range_end, count_back)
            .await?;
        let bars = bars
            .iter()
            .map(|bar| self.supply.present(bar, symbol.mode))
            .collect();
        Ok(HistoryResult::new(bars, next_time))
    }

    /// Untransformed bars sorted by start time, plus the server's `nextTime`.
    pub async fn fetch_raw(
        &self,
        symbol: &SymbolDescriptor,
        resolution: &str,
        range_start: i64,
        range_end: i64,
        count_back: u32,
    ) -> ApiResult<(Vec<Bar>, Option<i64>)> {
        let params = OhlcvParams::new(&self.pair_address, to_upstream_resolution(resolution))
            .with_time_range(range_start, range_end)
            .with_count_back(count_back)
            .with_usd(symbol.is_usd());

        let payload = self.source.fetch_ohlcv(&params).await?;
        if matches!(payload, OhlcvPayload::Unrecognized(_)) {
            tracing::debug!(pair = %self.pair_address, "Unrecognized OHLCV payload, treating as empty");
        }

        let mut bars: Vec<Bar> = payload.rows().iter().filter_map(normalize_row).collect();
        bars.sort_by_key(|bar| bar.start_time);
        Ok((bars, payload.next_time()))
    }

    /// Last known raw bar, looking back `lookback_secs` from `now_ms`.
    ///
    /// Never fails: on a fetch error or an empty window the seed is a zero
    /// bar at the bucket containing `now_ms`.
    pub async fn fetch_seed(
        &self,
        symbol: &SymbolDescriptor,
        resolution: &str,
        now_ms: i64,
        lookback_secs: i64,
        count_back: u32,
    ) -> Bar {
        let now_secs = now_ms.div_euclid(1000);
        let fallback = || Bar::zero(align_to_bucket(now_ms, bucket_width_ms(resolution)));

        match self
            .fetch_raw(symbol, resolution, now_secs - lookback_secs, now_secs, count_back)
            .await
        {
            Ok((bars, _)) => match bars.last() {
                Some(last) => *last,
                None => {
                    tracing::warn!(pair = %self.pair_address, resolution, "No recent bars, seeding with zero bar");
                    fallback()
                }
            },
            Err(e) => {
                tracing::warn!(pair = %self.pair_address, resolution, error = %e, "Seed fetch failed, seeding with zero bar");
                fallback()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{ApiError, ErrorResponse};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Replays canned payloads and records the queries it saw.
    #[derive(Debug, Default)]
    pub(crate) struct FakeSource {
        pub responses: Mutex<Vec<Result<Value, u16>>>,
        pub seen: Mutex<Vec<OhlcvParams>>,
    }

    impl FakeSource {
        pub fn with(responses: Vec<Result<Value, u16>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl OhlcvSource for FakeSource {
        async fn fetch_ohlcv(&self, params: &OhlcvParams) -> ApiResult<OhlcvPayload> {
            self.seen.lock().unwrap().push(params.clone());
            let next = {
                let mut responses = self.responses.lock().unwrap();
                if responses.is_empty() {
                    Ok(json!([]))
                } else {
                    responses.remove(0)
                }
            };
            match next {
                Ok(value) => Ok(serde_json::from_value(value).unwrap()),
                Err(status) => Err(ApiError::UnexpectedStatus(
                    status,
                    ErrorResponse::from_text("fake failure"),
                )),
            }
        }
    }

    fn fetcher(responses: Vec<Result<Value, u16>>, supply: f64) -> HistoryFetcher<FakeSource> {
        HistoryFetcher::new(FakeSource::with(responses), "0xpair", TotalSupply::new(supply))
    }

    #[tokio::test]
    async fn test_bare_array_sorted() {
        let f = fetcher(
            vec![Ok(json!([
                {"timestamp": 120, "o": 2, "h": 3, "l": 1, "c": 2.5, "v": 9},
                {"timestamp": 60, "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 4}
            ]))],
            0.0,
        );
        let symbol = SymbolDescriptor::parse("NOOT");
        let result = f.fetch_history(&symbol, "1", 0, 200, 10).await.unwrap();

        assert!(!result.no_data);
        assert_eq!(result.bars.len(), 2);
        assert_eq!(result.bars[0].start_time, 60_000);
        assert_eq!(result.bars[1].start_time, 120_000);
        assert_eq!(result.bars[1].close, 2.5);
    }

    #[tokio::test]
    async fn test_query_parameters() {
        let f = fetcher(vec![], 0.0);
        let symbol = SymbolDescriptor::parse("NOOT@WETH");
        f.fetch_history(&symbol, "240", 100, 200, 7).await.unwrap();

        let seen = f.source().seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].pair_address, "0xpair");
        assert_eq!(seen[0].resolution, "4h");
        assert_eq!(seen[0].from, 100);
        assert_eq!(seen[0].to, 200);
        assert_eq!(seen[0].count_back, 7);
        assert!(!seen[0].is_usd);
    }

    #[tokio::test]
    async fn test_wrapped_with_next_time() {
        let f = fetcher(
            vec![Ok(json!({"bars": [{"timestamp": 1700000000000u64, "close": 1}], "nextTime": 1699990000}))],
            0.0,
        );
        let result = f
            .fetch_history(&SymbolDescriptor::parse("X"), "1", 0, 1, 1)
            .await
            .unwrap();
        assert_eq!(result.bars[0].start_time, 1_700_000_000_000);
        assert_eq!(result.next_time, Some(1_699_990_000));
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_no_data() {
        let f = fetcher(vec![Ok(json!({"error": "nope"}))], 0.0);
        let result = f
            .fetch_history(&SymbolDescriptor::parse("X"), "1", 0, 1, 1)
            .await
            .unwrap();
        assert!(result.no_data);
        assert!(result.bars.is_empty());
    }

    #[tokio::test]
    async fn test_market_cap_history() {
        let f = fetcher(
            vec![Ok(json!([{"timestamp": 60, "open": 0.001, "high": 0.003, "low": 0.001, "close": 0.002, "volume": 5}]))],
            1_000_000.0,
        );
        let result = f
            .fetch_history(&SymbolDescriptor::parse("X#MCAP"), "1", 0, 100, 1)
            .await
            .unwrap();
        assert!((result.bars[0].close - 2000.0).abs() < 1e-9);
        assert_eq!(result.bars[0].volume, 5.0);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let f = fetcher(vec![Err(500)], 0.0);
        let result = f
            .fetch_history(&SymbolDescriptor::parse("X"), "1", 0, 1, 1)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_seed_is_latest_raw_bar() {
        let f = fetcher(
            vec![Ok(json!([
                {"timestamp": 120, "close": 11},
                {"timestamp": 60, "close": 10}
            ]))],
            1_000_000.0,
        );
        let seed = f
            .fetch_seed(&SymbolDescriptor::parse("X#MCAP"), "1", 150_000, 3600, 1)
            .await;
        assert_eq!(seed.start_time, 120_000);
        // Seeds stay untransformed
        assert_eq!(seed.close, 11.0);

        let seen = f.source().seen.lock().unwrap();
        assert_eq!(seen[0].from, 150 - 3600);
        assert_eq!(seen[0].to, 150);
    }

    #[tokio::test]
    async fn test_seed_falls_back_to_zero_bar() {
        let f = fetcher(vec![Err(503)], 0.0);
        let seed = f
            .fetch_seed(&SymbolDescriptor::parse("X"), "1", 125_500, 3600, 1)
            .await;
        assert_eq!(seed, Bar::zero(120_000));

        let f = fetcher(vec![Ok(json!([]))], 0.0);
        let seed = f
            .fetch_seed(&SymbolDescriptor::parse("X"), "5", 125_500, 3600, 1)
            .await;
        assert_eq!(seed, Bar::zero(0));
    }
}
