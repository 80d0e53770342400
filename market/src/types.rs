use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SecurityId = i64;

/// One row of the security roster.
///
/// A ticker is only valid on `[min_date, max_date)`; renames show up as a new
/// row for the same id with a later `min_date`. `max_date = None` means the
/// row is the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub security_id: SecurityId,
    pub ticker: String,
    pub min_date: DateTime<Utc>,
    pub max_date: Option<DateTime<Utc>>,
}

impl Security {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.min_date && self.max_date.is_none_or(|max| at < max)
    }
}

/// OHLCV aggregate for one time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn from_tick(price: f64, volume: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Provider bar; `ts_ms` is the bucket start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub ts_ms: i64,
    pub bar: Bar,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ts_ms: i64,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ts_ms: i64,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
}

/// Reference data used to fill in the static statistics of a security.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityDetails {
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Second,
    SecondExtended,
    Minute,
    MinuteExtended,
    Hour,
    Day,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::Second,
        Timeframe::SecondExtended,
        Timeframe::Minute,
        Timeframe::MinuteExtended,
        Timeframe::Hour,
        Timeframe::Day,
    ];

    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::Second | Timeframe::SecondExtended => 1,
            Timeframe::Minute | Timeframe::MinuteExtended => 60,
            Timeframe::Hour => 3_600,
            Timeframe::Day => 86_400,
        }
    }

    pub fn millis(self) -> i64 {
        self.seconds() * 1_000
    }

    /// Regular-hours timeframes only aggregate ticks between 09:30 and 16:00.
    pub fn regular_hours_only(self) -> bool {
        matches!(self, Timeframe::Second | Timeframe::Minute)
    }

    pub fn accepts(self, ts_ms: i64) -> bool {
        match self {
            Timeframe::Second | Timeframe::Minute => common::time::is_regular_hours(ts_ms),
            Timeframe::SecondExtended | Timeframe::MinuteExtended => {
                common::time::is_extended_hours(ts_ms)
            }
            Timeframe::Hour | Timeframe::Day => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Second => "second",
            Timeframe::SecondExtended => "second_extended",
            Timeframe::Minute => "minute",
            Timeframe::MinuteExtended => "minute_extended",
            Timeframe::Hour => "hour",
            Timeframe::Day => "day",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s.trim())
            .ok_or_else(|| format!("unknown timeframe: {s}"))
    }
}
