//! Numeric helpers for prices and timestamps.
//!
//! Upstream payloads are loose: numbers may arrive as JSON numbers or as
//! numeric strings, and timestamps may be seconds or milliseconds.

use serde_json::Value;

/// Raw timestamps above this are already milliseconds.
pub const MILLIS_THRESHOLD: f64 = 1e12;

/// Display precision for standard price mode.
pub const STANDARD_DECIMALS: u32 = 6;

/// Display precision for market-cap mode and low-value quote currencies.
pub const FINE_DECIMALS: u32 = 12;

/// Read a JSON value as a finite `f64`.
///
/// Accepts numbers and numeric strings. Anything else, including NaN and
/// infinities, is `None`.
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Like [`as_number`] but missing or non-numeric values become `0.0`.
pub fn number_or_zero(value: Option<&Value>) -> f64 {
    value.and_then(as_number).unwrap_or(0.0)
}

/// Normalize a historical row timestamp to milliseconds.
///
/// Values above 10^12 are taken as milliseconds, anything else as seconds.
pub fn timestamp_to_ms(raw: f64) -> i64 {
    if raw > MILLIS_THRESHOLD {
        raw as i64
    } else {
        (raw * 1000.0) as i64
    }
}

/// Live ticks always carry seconds.
pub fn seconds_to_ms(raw: f64) -> i64 {
    (raw * 1000.0) as i64
}

/// `10^decimals`, the price scale a chart widget expects.
pub fn price_scale(decimals: u32) -> u64 {
    10u64.saturating_pow(decimals)
}
