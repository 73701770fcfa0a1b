//! Ingestion boundary for upstream OHLCV rows and tick payloads.
//!
//! Upstream rows come in two shapes, full field names (`open`, `high`, ...)
//! or single letters (`o`, `h`, ...). Both map into [`Bar`] or [`Tick`] here
//! and nowhere else.

use serde_json::{Map, Value};

use super::price::{as_number, number_or_zero, seconds_to_ms, timestamp_to_ms};
use super::types::{Bar, Tick};

const TIMESTAMP: &[&str] = &["timestamp", "time", "t"];
const OPEN: &[&str] = &["open", "o"];
const HIGH: &[&str] = &["high", "h"];
const LOW: &[&str] = &["low", "l"];
const CLOSE: &[&str] = &["close", "c"];
const VOLUME: &[&str] = &["volume", "v"];

/// First non-null field among `names`.
fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

/// Normalize one historical row. Missing values become 0.
///
/// Returns `None` only when the row is not a JSON object.
pub fn normalize_row(row: &Value) -> Option<Bar> {
    let obj = row.as_object()?;
    Some(Bar {
        start_time: timestamp_to_ms(number_or_zero(field(obj, TIMESTAMP))),
        open: number_or_zero(field(obj, OPEN)),
        high: number_or_zero(field(obj, HIGH)),
        low: number_or_zero(field(obj, LOW)),
        close: number_or_zero(field(obj, CLOSE)),
        volume: number_or_zero(field(obj, VOLUME)),
    })
}

/// Normalize the `data` object of a live tick message.
///
/// The timestamp is required and is read as seconds. Price fields default to 0.
pub fn normalize_tick(data: &Value) -> Option<Tick> {
    let obj = data.as_object()?;
    let seconds = field(obj, TIMESTAMP).and_then(as_number)?;
    Some(Tick {
        time_ms: seconds_to_ms(seconds),
        open: number_or_zero(field(obj, OPEN)),
        high: number_or_zero(field(obj, HIGH)),
        low: number_or_zero(field(obj, LOW)),
        close: number_or_zero(field(obj, CLOSE)),
        volume: number_or_zero(field(obj, VOLUME)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_names() {
        let bar = normalize_row(&json!({
            "timestamp": 60,
            "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 10
        }))
        .unwrap();
        assert_eq!(bar.start_time, 60_000);
        assert_eq!(bar.open, 1.0);
        assert_eq!(bar.high, 2.0);
        assert_eq!(bar.low, 0.5);
        assert_eq!(bar.close, 1.5);
        assert_eq!(bar.volume, 10.0);
    }

    #[test]
    fn test_letter_names_and_strings() {
        let bar = normalize_row(&json!({
            "timestamp": "1700000000000",
            "o": "1", "h": "2", "l": "0.5", "c": "1.5", "v": "10"
        }))
        .unwrap();
        assert_eq!(bar.start_time, 1_700_000_000_000);
        assert_eq!(bar.close, 1.5);
        assert_eq!(bar.volume, 10.0);
    }

    #[test]
    fn test_full_name_wins_over_letter() {
        let bar = normalize_row(&json!({"timestamp": 1, "open": 5, "o": 9})).unwrap();
        assert_eq!(bar.open, 5.0);
    }

    #[test]
    fn test_null_falls_through_to_letter() {
        let bar = normalize_row(&json!({"timestamp": 1, "open": null, "o": 9})).unwrap();
        assert_eq!(bar.open, 9.0);
    }

    #[test]
    fn test_missing_fields_default_zero() {
        let bar = normalize_row(&json!({})).unwrap();
        assert_eq!(bar, Bar::zero(0));
    }

    #[test]
    fn test_non_object_row() {
        assert!(normalize_row(&json!([1, 2, 3])).is_none());
        assert!(normalize_row(&json!("row")).is_none());
    }

    #[test]
    fn test_tick_requires_timestamp() {
        assert!(normalize_tick(&json!({"open": 1, "close": 2})).is_none());
        assert!(normalize_tick(&json!({"timestamp": "soon", "close": 2})).is_none());
        assert!(normalize_tick(&json!(null)).is_none());
    }

    #[test]
    fn test_tick_seconds() {
        let tick = normalize_tick(&json!({
            "timestamp": 120, "open": "10", "high": 11, "low": 9, "close": 10.5, "volume": 100
        }))
        .unwrap();
        assert_eq!(tick.time_ms, 120_000);
        assert_eq!(tick.open, 10.0);
        assert_eq!(tick.volume, 100.0);
    }
}
