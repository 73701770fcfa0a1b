//! OHLCV history types for the REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::price::as_number;

/// Query parameters for GET /api/ohlcv.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OhlcvParams {
    /// Pair identifier (required)
    pub pair_address: String,
    /// Upstream resolution token (`"1m"`, `"4h"`, ...)
    pub resolution: String,
    /// Range start, unix seconds
    pub from: i64,
    /// Range end, unix seconds
    pub to: i64,
    /// Number of bars the chart wants before `to`
    pub count_back: u32,
    /// Quote in USD instead of the pair's native quote
    pub is_usd: bool,
}

impl OhlcvParams {
    /// Create new params with the required pair address and resolution.
    pub fn new(pair_address: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            pair_address: pair_address.into(),
            resolution: resolution.into(),
            ..Default::default()
        }
    }

    /// Set time range (seconds).
    pub fn with_time_range(mut self, from: i64, to: i64) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_count_back(mut self, count_back: u32) -> Self {
        self.count_back = count_back;
        self
    }

    pub fn with_usd(mut self, is_usd: bool) -> Self {
        self.is_usd = is_usd;
        self
    }
}

/// Response body of GET /api/ohlcv.
///
/// The endpoint returns either a bare row array or `{bars, nextTime}`.
/// Anything else deserializes into [`OhlcvPayload::Unrecognized`] and is
/// treated as an empty history.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OhlcvPayload {
    Rows(Vec<Value>),
    Wrapped {
        bars: Vec<Value>,
        #[serde(default, rename = "nextTime")]
        next_time: Option<Value>,
    },
    Unrecognized(Value),
}

impl OhlcvPayload {
    /// Raw rows, empty for unrecognized shapes.
    pub fn rows(&self) -> &[Value] {
        match self {
            Self::Rows(rows) | Self::Wrapped { bars: rows, .. } => rows,
            Self::Unrecognized(_) => &[],
        }
    }

    /// `nextTime` hint, when the server sent a numeric one.
    pub fn next_time(&self) -> Option<i64> {
        match self {
            Self::Wrapped {
                next_time: Some(v), ..
            } => as_number(v).map(|n| n as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_builder() {
        let params = OhlcvParams::new("0xpair", "1m")
            .with_time_range(1000, 2000)
            .with_count_back(300)
            .with_usd(true);

        assert_eq!(params.pair_address, "0xpair");
        assert_eq!(params.resolution, "1m");
        assert_eq!(params.from, 1000);
        assert_eq!(params.to, 2000);
        assert_eq!(params.count_back, 300);
        assert!(params.is_usd);
    }

    #[test]
    fn test_params_query_string() {
        let params = OhlcvParams::new("0xpair", "4h")
            .with_time_range(10, 20)
            .with_count_back(5);
        let query = serde_urlencoded::to_string(&params).unwrap();
        assert_eq!(
            query,
            "pair_address=0xpair&resolution=4h&from=10&to=20&count_back=5&is_usd=false"
        );
    }

    #[test]
    fn test_payload_bare_array() {
        let payload: OhlcvPayload = serde_json::from_str(r#"[{"timestamp":1},{"timestamp":2}]"#).unwrap();
        assert_eq!(payload.rows().len(), 2);
        assert_eq!(payload.next_time(), None);
    }

    #[test]
    fn test_payload_wrapped() {
        let payload: OhlcvPayload =
            serde_json::from_str(r#"{"bars":[{"timestamp":1}],"nextTime":1700000000}"#).unwrap();
        assert_eq!(payload.rows().len(), 1);
        assert_eq!(payload.next_time(), Some(1_700_000_000));
    }

    #[test]
    fn test_payload_unrecognized() {
        for body in [r#"{"data":[]}"#, r#""oops""#, "null", r#"{"bars":null}"#] {
            let payload: OhlcvPayload = serde_json::from_str(body).unwrap();
            assert!(payload.rows().is_empty(), "body {}", body);
        }
    }
}
