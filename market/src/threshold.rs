//! Per-security burst baselines.
//!
//! The trading day (04:00-20:00 exchange-local) is cut into seven periods.
//! For each period the profile stores the average volume and the average
//! relative price range observed in 20 second windows over the trailing
//! history. A threshold of `0.0` means the period had no data and nothing
//! can fire against it.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use common::time::{AFTER_HOURS_CLOSE_SECS, PREMARKET_OPEN_SECS, local_date, seconds_of_day};

use crate::types::{Bar, HistoricalBar};

pub const WINDOW_SECS: u32 = 20;
pub const STEP_SECS: u32 = 5;
pub const PROFILE_LOOKBACK_DAYS: i64 = 15;

pub const PERIOD_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingPeriod {
    Premarket,
    OpenEarly,
    OpenLate,
    MiddayEarly,
    MiddayLate,
    Afternoon,
    AfterHours,
}

const fn hm(h: u32, m: u32) -> u32 {
    h * 3600 + m * 60
}

impl TradingPeriod {
    pub const ALL: [TradingPeriod; PERIOD_COUNT] = [
        TradingPeriod::Premarket,
        TradingPeriod::OpenEarly,
        TradingPeriod::OpenLate,
        TradingPeriod::MiddayEarly,
        TradingPeriod::MiddayLate,
        TradingPeriod::Afternoon,
        TradingPeriod::AfterHours,
    ];

    /// `[start, end)` in seconds after local midnight.
    pub const fn bounds(self) -> (u32, u32) {
        match self {
            TradingPeriod::Premarket => (PREMARKET_OPEN_SECS, hm(9, 30)),
            TradingPeriod::OpenEarly => (hm(9, 30), hm(9, 45)),
            TradingPeriod::OpenLate => (hm(9, 45), hm(10, 0)),
            TradingPeriod::MiddayEarly => (hm(10, 0), hm(12, 0)),
            TradingPeriod::MiddayLate => (hm(12, 0), hm(14, 0)),
            TradingPeriod::Afternoon => (hm(14, 0), hm(16, 0)),
            TradingPeriod::AfterHours => (hm(16, 0), AFTER_HOURS_CLOSE_SECS),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_seconds(secs: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| {
            let (start, end) = p.bounds();
            (start..end).contains(&secs)
        })
    }

    /// Period of an epoch-ms timestamp, `None` outside 04:00-20:00.
    pub fn at(ts_ms: i64) -> Option<Self> {
        Self::from_seconds(seconds_of_day(ts_ms))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradingPeriod::Premarket => "premarket",
            TradingPeriod::OpenEarly => "open_early",
            TradingPeriod::OpenLate => "open_late",
            TradingPeriod::MiddayEarly => "midday_early",
            TradingPeriod::MiddayLate => "midday_late",
            TradingPeriod::Afternoon => "afternoon",
            TradingPeriod::AfterHours => "after_hours",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstThresholdProfile {
    pub volume_threshold: [f64; PERIOD_COUNT],
    pub price_threshold: [f64; PERIOD_COUNT],
}

impl BurstThresholdProfile {
    pub fn is_empty(&self) -> bool {
        self.volume_threshold.iter().all(|v| *v == 0.0)
            && self.price_threshold.iter().all(|v| *v == 0.0)
    }

    /// `(volume, price_range)` thresholds for `period`.
    pub fn thresholds(&self, period: TradingPeriod) -> (f64, f64) {
        let i = period.index();
        (self.volume_threshold[i], self.price_threshold[i])
    }
}

#[derive(Default)]
struct PeriodAccumulator {
    volume: f64,
    price_range: f64,
    windows: u64,
}

/// Merges bars that share the same local second.
fn merge(into: &mut Bar, bar: &Bar) {
    into.high = into.high.max(bar.high);
    into.low = into.low.min(bar.low);
    into.close = bar.close;
    into.volume += bar.volume;
}

/// Builds the profile from trailing second bars.
///
/// Bars outside 04:00-20:00 are ignored. Days are visited in calendar order
/// and windows in time order, so the same input always produces the same
/// floating point result.
pub fn compute_profile(bars: &[HistoricalBar]) -> BurstThresholdProfile {
    let mut days: BTreeMap<NaiveDate, BTreeMap<u32, Bar>> = BTreeMap::new();

    for hb in bars {
        let secs = seconds_of_day(hb.ts_ms);
        if !(PREMARKET_OPEN_SECS..AFTER_HOURS_CLOSE_SECS).contains(&secs) {
            continue;
        }
        days.entry(local_date(hb.ts_ms))
            .or_default()
            .entry(secs)
            .and_modify(|b| merge(b, &hb.bar))
            .or_insert(hb.bar);
    }

    let mut acc: [PeriodAccumulator; PERIOD_COUNT] = Default::default();

    for day in days.values() {
        for period in TradingPeriod::ALL {
            let (period_start, period_end) = period.bounds();
            let slot = &mut acc[period.index()];

            let mut start = period_start;
            while start + WINDOW_SECS <= period_end {
                let mut volume = 0.0;
                let mut high = f64::MIN;
                let mut low = f64::MAX;
                let mut seen = false;

                for bar in day.range(start..start + WINDOW_SECS).map(|(_, b)| b) {
                    seen = true;
                    volume += bar.volume;
                    high = high.max(bar.high);
                    low = low.min(bar.low);
                }

                if seen {
                    let range = if low > 0.0 { (high - low) / low } else { 0.0 };
                    slot.volume += volume;
                    slot.price_range += range;
                    slot.windows += 1;
                }

                start += STEP_SECS;
            }
        }
    }

    let mut profile = BurstThresholdProfile::default();
    for (i, slot) in acc.iter().enumerate() {
        if slot.windows > 0 {
            let n = slot.windows as f64;
            profile.volume_threshold[i] = slot.volume / n;
            profile.price_threshold[i] = slot.price_range / n;
        }
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::time::at_local;

    fn bar_at(date: NaiveDate, secs: u32, low: f64, high: f64, volume: f64) -> HistoricalBar {
        HistoricalBar {
            ts_ms: at_local(date, secs),
            bar: Bar {
                open: low,
                high,
                low,
                close: high,
                volume,
            },
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 18).unwrap()
    }

    #[test]
    fn periods_cover_extended_session_without_overlap() {
        assert_eq!(TradingPeriod::from_seconds(hm(3, 59)), None);
        assert_eq!(TradingPeriod::from_seconds(hm(4, 0)), Some(TradingPeriod::Premarket));
        assert_eq!(TradingPeriod::from_seconds(hm(9, 30)), Some(TradingPeriod::OpenEarly));
        assert_eq!(TradingPeriod::from_seconds(hm(9, 45)), Some(TradingPeriod::OpenLate));
        assert_eq!(TradingPeriod::from_seconds(hm(15, 59)), Some(TradingPeriod::Afternoon));
        assert_eq!(TradingPeriod::from_seconds(hm(19, 59)), Some(TradingPeriod::AfterHours));
        assert_eq!(TradingPeriod::from_seconds(hm(20, 0)), None);

        for pair in TradingPeriod::ALL.windows(2) {
            assert_eq!(pair[0].bounds().1, pair[1].bounds().0);
        }
    }

    #[test]
    fn empty_history_gives_empty_profile() {
        let profile = compute_profile(&[]);
        assert!(profile.is_empty());
        assert_eq!(profile.thresholds(TradingPeriod::OpenEarly), (0.0, 0.0));
    }

    #[test]
    fn single_bar_is_counted_by_every_window_that_contains_it() {
        // 10:00:30 falls in windows starting 10:00:15, :20, :25 and :30.
        let bars = vec![bar_at(monday(), hm(10, 0) + 30, 100.0, 101.0, 400.0)];
        let profile = compute_profile(&bars);

        let (volume, price) = profile.thresholds(TradingPeriod::MiddayEarly);
        assert_eq!(volume, 400.0);
        assert!((price - 0.01).abs() < 1e-12);

        assert_eq!(profile.thresholds(TradingPeriod::Afternoon), (0.0, 0.0));
    }

    #[test]
    fn windows_never_straddle_period_boundary() {
        // 09:29:59 is premarket; a window crossing 09:30 would pull it into
        // open-early.
        let bars = vec![bar_at(monday(), hm(9, 30) - 1, 10.0, 10.0, 50.0)];
        let profile = compute_profile(&bars);

        assert_eq!(profile.thresholds(TradingPeriod::OpenEarly).0, 0.0);
        assert_eq!(profile.thresholds(TradingPeriod::Premarket).0, 50.0);
    }

    #[test]
    fn zero_low_contributes_zero_range() {
        let bars = vec![bar_at(monday(), hm(12, 0), 0.0, 5.0, 10.0)];
        let profile = compute_profile(&bars);
        assert_eq!(profile.thresholds(TradingPeriod::MiddayLate), (10.0, 0.0));
    }

    #[test]
    fn averages_across_days() {
        let tuesday = monday().succ_opt().unwrap();
        let bars = vec![
            bar_at(monday(), hm(14, 0), 10.0, 10.0, 100.0),
            bar_at(tuesday, hm(14, 0), 10.0, 10.0, 300.0),
        ];
        let profile = compute_profile(&bars);
        assert_eq!(profile.thresholds(TradingPeriod::Afternoon).0, 200.0);
    }

    #[test]
    fn bars_outside_extended_session_are_ignored() {
        let bars = vec![bar_at(monday(), hm(3, 0), 1.0, 2.0, 1_000.0)];
        assert!(compute_profile(&bars).is_empty());
    }

    /// Fifteen days of extended-session bars, one every 7 s, with prices and
    /// volumes from a fixed linear congruential sequence.
    fn fifteen_days_of_bars() -> Vec<HistoricalBar> {
        let first = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            (seed >> 33) as f64 / (1u64 << 31) as f64
        };

        let mut bars = Vec::new();
        for day in 0..PROFILE_LOOKBACK_DAYS {
            let date = first + chrono::Days::new(day as u64);
            let mut secs = PREMARKET_OPEN_SECS;
            while secs < AFTER_HOURS_CLOSE_SECS {
                let low = 20.0 + next() * 5.0;
                let high = low * (1.0 + next() * 0.004);
                bars.push(bar_at(date, secs, low, high, (next() * 900.0).floor()));
                secs += 7;
            }
        }
        bars
    }

    #[test]
    fn fifteen_day_profile_is_bit_for_bit_repeatable() {
        let bars = fifteen_days_of_bars();
        let first = compute_profile(&bars);
        let second = compute_profile(&bars);
        let mut shuffled = bars.clone();
        shuffled.reverse();
        let third = compute_profile(&shuffled);

        for i in 0..PERIOD_COUNT {
            assert!(first.volume_threshold[i] > 0.0);
            assert!(first.price_threshold[i] > 0.0);
            for other in [&second, &third] {
                assert_eq!(first.volume_threshold[i].to_bits(), other.volume_threshold[i].to_bits());
                assert_eq!(first.price_threshold[i].to_bits(), other.price_threshold[i].to_bits());
            }
        }
    }

    #[test]
    fn result_is_independent_of_input_order() {
        let mut bars: Vec<HistoricalBar> = (0..600u32)
            .map(|i| {
                let low = 50.0 + (i % 7) as f64 * 0.13;
                bar_at(monday(), hm(9, 30) + i, low, low * 1.003, (i * 37 % 101) as f64)
            })
            .collect();

        let forward = compute_profile(&bars);
        bars.reverse();
        let backward = compute_profile(&bars);

        for i in 0..PERIOD_COUNT {
            assert_eq!(forward.volume_threshold[i].to_bits(), backward.volume_threshold[i].to_bits());
            assert_eq!(forward.price_threshold[i].to_bits(), backward.price_threshold[i].to_bits());
        }
    }
}
