//! Shared type definitions for chartfeed.
//!
//! This module contains types that are used by the REST client, the socket
//! layer and the chart feed.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Bar
// ============================================================================

/// A single OHLCV candle.
///
/// Serialized with `time` as the start-of-bucket field, which is what chart
/// widgets expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bucket start in milliseconds since the epoch
    #[serde(rename = "time")]
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Raw asset units, never scaled
    pub volume: f64,
}

impl Bar {
    /// A bar with every value at zero.
    pub fn zero(start_time: i64) -> Self {
        Self {
            start_time,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
        }
    }

    /// Copy of this bar with OHLC multiplied by `factor`. Volume is untouched.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            start_time: self.start_time,
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.close * factor,
            volume: self.volume,
        }
    }

    /// Widen `high`/`low` so that both `open` and `close` fall inside them.
    pub fn widen_to_body(&mut self) {
        self.high = self.high.max(self.open).max(self.close);
        self.low = self.low.min(self.open).min(self.close);
    }

    /// `low <= open, close <= high`
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

// ============================================================================
// Tick
// ============================================================================

/// One live price update, already normalized to milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ============================================================================
// Symbol descriptor
// ============================================================================

/// Quote currency of a symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum QuoteUnit {
    #[default]
    Usd,
    Weth,
    Other(String),
}

impl QuoteUnit {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Usd => "USD",
            Self::Weth => "WETH",
            Self::Other(unit) => unit,
        }
    }

    pub fn is_usd(&self) -> bool {
        matches!(self, Self::Usd)
    }
}

impl From<&str> for QuoteUnit {
    fn from(s: &str) -> Self {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "USD" => Self::Usd,
            "WETH" => Self::Weth,
            _ => Self::Other(upper),
        }
    }
}

impl std::fmt::Display for QuoteUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether bars show unit price or price × total supply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PriceMode {
    #[default]
    Price,
    MarketCap,
}

impl PriceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "PRICE",
            Self::MarketCap => "MCAP",
        }
    }

    pub fn is_market_cap(&self) -> bool {
        matches!(self, Self::MarketCap)
    }
}

impl From<&str> for PriceMode {
    fn from(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("MCAP") {
            Self::MarketCap
        } else {
            Self::Price
        }
    }
}

impl std::fmt::Display for PriceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of a `BASE@UNIT#MODE` symbol string.
///
/// Parsing never fails: a missing `@UNIT` means USD and a missing `#MODE`
/// means PRICE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SymbolDescriptor {
    pub base: String,
    pub unit: QuoteUnit,
    pub mode: PriceMode,
}

impl SymbolDescriptor {
    pub fn parse(symbol: &str) -> Self {
        let (rest, mode) = match symbol.split_once('#') {
            Some((rest, mode)) => (rest, PriceMode::from(mode)),
            None => (symbol, PriceMode::Price),
        };
        let (base, unit) = match rest.split_once('@') {
            Some((base, unit)) => (base, QuoteUnit::from(unit)),
            None => (rest, QuoteUnit::Usd),
        };
        Self {
            base: base.trim().to_string(),
            unit,
            mode,
        }
    }

    /// Value of the upstream `is_usd` flag.
    pub fn is_usd(&self) -> bool {
        self.unit.is_usd()
    }
}

impl FromStr for SymbolDescriptor {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl std::fmt::Display for SymbolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.base, self.unit, self.mode)
    }
}
