//! Tape burst detection.
//!
//! Every trade is appended to a per-security [`TapeWindow`] that keeps the
//! last 20 seconds of prints with O(1) access to volume, max and min price.
//! [`BurstDetector`] compares that live window against the security's
//! [`BurstThresholdProfile`](crate::threshold::BurstThresholdProfile) for the
//! current period of the day.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::MarketError;
use crate::state::SecurityAggregateState;
use crate::store::AggregateStore;
use crate::threshold::{TradingPeriod, WINDOW_SECS};
use crate::types::SecurityId;

pub const DEFAULT_WINDOW_MS: i64 = WINDOW_SECS as i64 * 1_000;
pub const DEFAULT_COOLDOWN_MS: i64 = 60_000;

#[derive(Clone, Copy, Debug)]
struct TapeEntry {
    seq: u64,
    ts_ms: i64,
    price: f64,
    size: f64,
}

/// Sliding window of recent trades.
///
/// `max_queue` is non-increasing and `min_queue` non-decreasing in price, so
/// their fronts are the window extremes. Entries are matched on eviction by
/// sequence number, which stays unique even when prints share a timestamp.
#[derive(Debug)]
pub struct TapeWindow {
    values: VecDeque<TapeEntry>,
    max_queue: VecDeque<TapeEntry>,
    min_queue: VecDeque<TapeEntry>,
    volume: f64,
    window_ms: i64,
    next_seq: u64,
    last_burst_ms: Option<i64>,
}

impl Default for TapeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl TapeWindow {
    pub fn new(window_ms: i64) -> Self {
        Self {
            values: VecDeque::new(),
            max_queue: VecDeque::new(),
            min_queue: VecDeque::new(),
            volume: 0.0,
            window_ms,
            next_seq: 0,
            last_burst_ms: None,
        }
    }

    pub fn push(&mut self, ts_ms: i64, price: f64, size: f64) {
        let entry = TapeEntry {
            seq: self.next_seq,
            ts_ms,
            price,
            size,
        };
        self.next_seq += 1;

        self.values.push_back(entry);
        self.volume += size;

        while self.max_queue.back().is_some_and(|b| b.price < price) {
            self.max_queue.pop_back();
        }
        self.max_queue.push_back(entry);

        while self.min_queue.back().is_some_and(|b| b.price > price) {
            self.min_queue.pop_back();
        }
        self.min_queue.push_back(entry);

        self.evict(ts_ms);
    }

    /// Drops prints at or before `now_ms - window_ms`.
    pub fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while let Some(front) = self.values.front().copied() {
            if front.ts_ms > cutoff {
                break;
            }
            self.values.pop_front();
            self.volume -= front.size;

            if self.max_queue.front().is_some_and(|m| m.seq == front.seq) {
                self.max_queue.pop_front();
            }
            if self.min_queue.front().is_some_and(|m| m.seq == front.seq) {
                self.min_queue.pop_front();
            }
        }

        if self.values.is_empty() {
            self.volume = 0.0;
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn max(&self) -> Option<f64> {
        self.max_queue.front().map(|v| v.price)
    }

    pub fn min(&self) -> Option<f64> {
        self.min_queue.front().map(|v| v.price)
    }

    /// `(max - min) / min` over the window, `0.0` when empty or `min` is zero.
    pub fn price_range(&self) -> f64 {
        match (self.max(), self.min()) {
            (Some(hi), Some(lo)) if lo > 0.0 => (hi - lo) / lo,
            _ => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_burst_ms(&self) -> Option<i64> {
        self.last_burst_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapeBurst {
    pub security_id: SecurityId,
    pub ticker: String,
    pub ts_ms: i64,
    pub period: TradingPeriod,
    pub volume: f64,
    pub price_range: f64,
    pub volume_threshold: f64,
    pub price_threshold: f64,
}

pub struct BurstDetector {
    store: Arc<AggregateStore>,
    cooldown_ms: i64,
}

impl BurstDetector {
    pub fn new(store: Arc<AggregateStore>, cooldown_ms: i64) -> Self {
        Self { store, cooldown_ms }
    }

    pub fn evaluate(
        &self,
        security_id: SecurityId,
        now_ms: i64,
    ) -> Result<Option<TapeBurst>, MarketError> {
        let state = self.store.get(security_id)?;
        Ok(self.evaluate_state(&state, now_ms))
    }

    /// Evaluates every security with a baseline. Returns alerts ordered by id.
    pub fn sweep(&self, now_ms: i64) -> Vec<TapeBurst> {
        if !self.store.is_ready() {
            debug!("burst sweep skipped, store not ready");
            return Vec::new();
        }
        let Some(snapshot) = self.store.snapshot() else {
            return Vec::new();
        };
        if TradingPeriod::at(now_ms).is_none() {
            return Vec::new();
        }

        let mut bursts: Vec<TapeBurst> = snapshot
            .states()
            .filter(|s| !s.profile.is_empty())
            .filter_map(|s| self.evaluate_state(s, now_ms))
            .collect();
        bursts.sort_by_key(|b| b.security_id);

        if !bursts.is_empty() {
            info!(count = bursts.len(), "tape bursts detected");
        }
        bursts
    }

    fn evaluate_state(&self, state: &SecurityAggregateState, now_ms: i64) -> Option<TapeBurst> {
        let period = TradingPeriod::at(now_ms)?;
        let (volume_threshold, price_threshold) = state.profile.thresholds(period);
        if volume_threshold <= 0.0 || price_threshold <= 0.0 {
            return None;
        }

        let mut tape = state.tape().lock();
        tape.evict(now_ms);
        let volume = tape.volume();
        let price_range = tape.price_range();

        if volume <= volume_threshold || price_range <= price_threshold {
            return None;
        }
        if tape
            .last_burst_ms
            .is_some_and(|last| now_ms - last < self.cooldown_ms)
        {
            return None;
        }
        tape.last_burst_ms = Some(now_ms);

        Some(TapeBurst {
            security_id: state.security_id(),
            ticker: state.ticker().to_string(),
            ts_ms: now_ms,
            period,
            volume,
            price_range,
            volume_threshold,
            price_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_tracks_extremes_and_volume() {
        let mut w = TapeWindow::new(20_000);
        w.push(0, 10.0, 100.0);
        w.push(5_000, 12.0, 50.0);
        w.push(10_000, 9.0, 25.0);

        assert_eq!(w.volume(), 175.0);
        assert_eq!(w.max(), Some(12.0));
        assert_eq!(w.min(), Some(9.0));
        assert!((w.price_range() - 3.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn old_prints_fall_out_of_window() {
        let mut w = TapeWindow::new(20_000);
        w.push(0, 15.0, 100.0);
        w.push(10_000, 10.0, 10.0);
        w.push(20_000, 11.0, 1.0);

        // The 15.0 print at t=0 is exactly one window old.
        assert_eq!(w.len(), 2);
        assert_eq!(w.volume(), 11.0);
        assert_eq!(w.max(), Some(11.0));

        w.evict(60_000);
        assert!(w.is_empty());
        assert_eq!(w.volume(), 0.0);
        assert_eq!(w.price_range(), 0.0);
    }

    #[test]
    fn equal_timestamps_evict_independently() {
        let mut w = TapeWindow::new(1_000);
        w.push(0, 5.0, 1.0);
        w.push(0, 5.0, 1.0);
        w.push(500, 4.0, 1.0);
        w.evict(1_000);

        assert_eq!(w.len(), 1);
        assert_eq!(w.max(), Some(4.0));
        assert_eq!(w.min(), Some(4.0));
    }
}
