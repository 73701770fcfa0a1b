//! Total supply input for market-cap mode.
//!
//! Supply usually arrives after the chart is already streaming. The value is
//! held in a `watch` channel so any holder can push an update and the emission
//! path reads the latest value without waiting.

use std::sync::Arc;

use tokio::sync::watch;

use crate::shared::{Bar, PriceMode};

#[derive(Debug, Clone)]
pub struct TotalSupply {
    tx: Arc<watch::Sender<f64>>,
}

impl Default for TotalSupply {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl TotalSupply {
    pub fn new(initial: f64) -> Self {
        let (tx, _rx) = watch::channel(sanitize(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Replace the supply. Non-finite or negative values are stored as 0.
    pub fn set(&self, supply: f64) {
        let supply = sanitize(supply);
        self.tx.send_replace(supply);
        tracing::debug!(supply, "Total supply updated");
    }

    /// Latest supply, 0 when unknown.
    pub fn get(&self) -> f64 {
        *self.tx.borrow()
    }

    /// Watch for supply changes.
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.tx.subscribe()
    }

    /// Present a raw bar in `mode`.
    ///
    /// Market-cap mode multiplies OHLC by the current supply, which zeroes the
    /// series while supply is unknown. Volume is never scaled.
    pub fn present(&self, bar: &Bar, mode: PriceMode) -> Bar {
        match mode {
            PriceMode::Price => *bar,
            PriceMode::MarketCap => bar.scaled(self.get()),
        }
    }
}

fn sanitize(supply: f64) -> f64 {
    if supply.is_finite() && supply >= 0.0 {
        supply
    } else {
        0.0
    }
}
