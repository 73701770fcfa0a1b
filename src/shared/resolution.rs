//! Chart resolution tokens and bucket arithmetic.
//!
//! Chart widgets speak in tokens like `"1S"`, `"5"` or `"1D"`. The upstream
//! OHLCV service speaks in `"1s"`, `"5m"`, `"1d"`. Everything here is total:
//! unrecognized input falls back to a default instead of failing.

use serde::{Deserialize, Serialize};

use super::types::Bar;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60_000;
const DAY_MS: i64 = 86_400_000;

/// Upstream token used when a chart token is not in the table.
pub const FALLBACK_UPSTREAM: &str = "1d";

/// Bucket width used when a chart token cannot be parsed.
pub const FALLBACK_BUCKET_WIDTH_MS: i64 = MINUTE_MS;

/// Chart resolution supported by the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1S")]
    OneSecond,
    #[default]
    #[serde(rename = "1")]
    OneMinute,
    #[serde(rename = "5")]
    FiveMinutes,
    #[serde(rename = "15")]
    FifteenMinutes,
    #[serde(rename = "30")]
    ThirtyMinutes,
    #[serde(rename = "60")]
    OneHour,
    #[serde(rename = "240")]
    FourHours,
    #[serde(rename = "720")]
    TwelveHours,
    #[serde(rename = "1D")]
    OneDay,
}

impl Resolution {
    /// Every resolution in table order, finest first.
    pub const ALL: [Resolution; 9] = [
        Self::OneSecond,
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::TwelveHours,
        Self::OneDay,
    ];

    /// Chart-side token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneSecond => "1S",
            Self::OneMinute => "1",
            Self::FiveMinutes => "5",
            Self::FifteenMinutes => "15",
            Self::ThirtyMinutes => "30",
            Self::OneHour => "60",
            Self::FourHours => "240",
            Self::TwelveHours => "720",
            Self::OneDay => "1D",
        }
    }

    /// Token understood by the upstream OHLCV endpoint and socket.
    pub fn upstream(&self) -> &'static str {
        match self {
            Self::OneSecond => "1s",
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
        }
    }

    /// Width of one bucket in milliseconds.
    pub fn bucket_width_ms(&self) -> i64 {
        match self {
            Self::OneSecond => SECOND_MS,
            Self::OneMinute => MINUTE_MS,
            Self::FiveMinutes => 5 * MINUTE_MS,
            Self::FifteenMinutes => 15 * MINUTE_MS,
            Self::ThirtyMinutes => 30 * MINUTE_MS,
            Self::OneHour => 60 * MINUTE_MS,
            Self::FourHours => 240 * MINUTE_MS,
            Self::TwelveHours => 720 * MINUTE_MS,
            Self::OneDay => DAY_MS,
        }
    }

    /// Look up a chart token. Matching is exact after trimming, except that
    /// the `S`/`D` suffix is accepted in either case.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(token))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bucket width for any chart token.
///
/// `<n>S` is seconds, `<n>D` is days, anything else is read as a count of
/// minutes. A missing count means 1. Input that does not parse to a positive
/// count yields one minute.
pub fn bucket_width_ms(token: &str) -> i64 {
    let token = token.trim();
    let (count, unit_ms) = if let Some(count) = strip_unit(token, 'S') {
        (count, SECOND_MS)
    } else if let Some(count) = strip_unit(token, 'D') {
        (count, DAY_MS)
    } else {
        (token, MINUTE_MS)
    };

    let count = if count.is_empty() {
        Some(1)
    } else {
        count.parse::<i64>().ok()
    };

    match count {
        Some(n) if n > 0 => n.saturating_mul(unit_ms),
        _ => FALLBACK_BUCKET_WIDTH_MS,
    }
}

/// Upstream token for a chart token, `"1d"` when the token is not in the table.
pub fn to_upstream_resolution(token: &str) -> &'static str {
    Resolution::from_token(token)
        .map(|r| r.upstream())
        .unwrap_or(FALLBACK_UPSTREAM)
}

/// Start of the bucket following `bar`.
pub fn next_boundary(bar: &Bar, token: &str) -> i64 {
    bar.start_time.saturating_add(bucket_width_ms(token))
}

/// Floor `time_ms` onto the epoch-relative grid of `width_ms`.
pub fn align_to_bucket(time_ms: i64, width_ms: i64) -> i64 {
    if width_ms <= 0 {
        return time_ms;
    }
    time_ms.div_euclid(width_ms) * width_ms
}

fn strip_unit(token: &str, unit: char) -> Option<&str> {
    token
        .strip_suffix(unit)
        .or_else(|| token.strip_suffix(unit.to_ascii_lowercase()))
}
