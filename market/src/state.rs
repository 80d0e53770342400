use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::buffer::TimeframeBuffer;
use crate::burst::TapeWindow;
use crate::threshold::BurstThresholdProfile;
use crate::types::{Bar, HistoricalBar, Security, SecurityId, Timeframe};

/// Number of daily bars the derived statistics average over.
pub const DAILY_STATS_BARS: usize = 30;

/// Static per-security numbers computed at initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedStats {
    pub dollar_volume: f64,
    pub market_cap: f64,
    pub avg_daily_range: f64,
}

impl DerivedStats {
    /// Averages dollar volume and daily range (in percent) over `days`.
    /// Days with a zero low do not contribute to the range.
    pub fn from_daily_bars(days: &[HistoricalBar], market_cap: f64) -> Self {
        let days: Vec<&Bar> = days.iter().take(DAILY_STATS_BARS).map(|d| &d.bar).collect();
        if days.is_empty() {
            return Self {
                market_cap,
                ..Self::default()
            };
        }

        let dollar_volume =
            days.iter().map(|b| b.close * b.volume).sum::<f64>() / days.len() as f64;

        let ranges: Vec<f64> = days
            .iter()
            .filter(|b| b.low > 0.0)
            .map(|b| (b.high - b.low) / b.low * 100.0)
            .collect();
        let avg_daily_range = if ranges.is_empty() {
            0.0
        } else {
            ranges.iter().sum::<f64>() / ranges.len() as f64
        };

        Self {
            dollar_volume,
            market_cap,
            avg_daily_range,
        }
    }
}

/// Everything the engine knows about one security.
///
/// Each buffer has its own lock so ticks on different timeframes never
/// contend. The tape window sits behind a separate mutex and is the only
/// thing the burst detector locks.
pub struct SecurityAggregateState {
    security: Security,
    buffers: HashMap<Timeframe, RwLock<TimeframeBuffer>>,
    pub stats: DerivedStats,
    pub profile: BurstThresholdProfile,
    tape: Mutex<TapeWindow>,
}

impl SecurityAggregateState {
    pub fn new(security: Security, timeframes: &[Timeframe], capacity: usize) -> Self {
        let buffers = timeframes
            .iter()
            .map(|tf| (*tf, RwLock::new(TimeframeBuffer::new(*tf, capacity))))
            .collect();

        Self {
            security,
            buffers,
            stats: DerivedStats::default(),
            profile: BurstThresholdProfile::default(),
            tape: Mutex::new(TapeWindow::default()),
        }
    }

    pub fn security_id(&self) -> SecurityId {
        self.security.security_id
    }

    pub fn ticker(&self) -> &str {
        &self.security.ticker
    }

    pub fn security(&self) -> &Security {
        &self.security
    }

    pub fn buffer(&self, timeframe: Timeframe) -> Option<&RwLock<TimeframeBuffer>> {
        self.buffers.get(&timeframe)
    }

    pub fn buffers(&self) -> impl Iterator<Item = (Timeframe, &RwLock<TimeframeBuffer>)> {
        self.buffers.iter().map(|(tf, buf)| (*tf, buf))
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut tfs: Vec<Timeframe> = self.buffers.keys().copied().collect();
        tfs.sort();
        tfs
    }

    pub fn tape(&self) -> &Mutex<TapeWindow> {
        &self.tape
    }

    /// Copy of the bars for `timeframe`, newest first.
    pub fn bars(&self, timeframe: Timeframe) -> Option<Vec<Bar>> {
        self.buffer(timeframe).map(|b| b.read().to_vec())
    }
}

impl std::fmt::Debug for SecurityAggregateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityAggregateState")
            .field("security_id", &self.security.security_id)
            .field("ticker", &self.security.ticker)
            .field("timeframes", &self.timeframes())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(low: f64, high: f64, close: f64, volume: f64) -> HistoricalBar {
        HistoricalBar {
            ts_ms: 0,
            bar: Bar {
                open: low,
                high,
                low,
                close,
                volume,
            },
        }
    }

    #[test]
    fn derived_stats_average_dollar_volume_and_range() {
        let days = vec![day(10.0, 11.0, 10.5, 1_000.0), day(20.0, 22.0, 21.0, 500.0)];
        let stats = DerivedStats::from_daily_bars(&days, 1e9);

        assert_eq!(stats.dollar_volume, (10_500.0 + 10_500.0) / 2.0);
        assert!((stats.avg_daily_range - 10.0).abs() < 1e-9);
        assert_eq!(stats.market_cap, 1e9);
    }

    #[test]
    fn zero_low_days_are_skipped_for_range() {
        let days = vec![day(0.0, 5.0, 1.0, 10.0), day(4.0, 5.0, 5.0, 10.0)];
        let stats = DerivedStats::from_daily_bars(&days, 0.0);
        assert!((stats.avg_daily_range - 25.0).abs() < 1e-9);
    }

    #[test]
    fn only_enabled_timeframes_get_buffers() {
        let security = Security {
            security_id: 7,
            ticker: "ABC".into(),
            min_date: chrono::DateTime::UNIX_EPOCH,
            max_date: None,
        };
        let state =
            SecurityAggregateState::new(security, &[Timeframe::Day, Timeframe::Minute], 10);

        assert_eq!(state.timeframes(), vec![Timeframe::Minute, Timeframe::Day]);
        assert!(state.buffer(Timeframe::Hour).is_none());
        assert_eq!(state.bars(Timeframe::Day), Some(vec![]));
    }
}
