use std::collections::VecDeque;

use crate::types::{Bar, Timeframe};

pub const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity ring of OHLCV bars for one (security, timeframe) pair.
///
/// Index 0 is always the bar currently being built. Bars are contiguous and
/// newest-first; once `capacity` is reached the oldest bar falls off the tail.
/// `rollover_ms` is the exclusive end of the bucket held at index 0 and never
/// moves backwards.
///
/// The buffer itself is not synchronized: [`SecurityAggregateState`] wraps each
/// one in its own lock.
///
/// [`SecurityAggregateState`]: crate::state::SecurityAggregateState
#[derive(Debug, Clone)]
pub struct TimeframeBuffer {
    timeframe: Timeframe,
    capacity: usize,
    bars: VecDeque<Bar>,
    rollover_ms: i64,
}

impl TimeframeBuffer {
    pub fn new(timeframe: Timeframe, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            timeframe,
            capacity,
            bars: VecDeque::with_capacity(capacity),
            rollover_ms: 0,
        }
    }

    /// Applies one tick. Returns `true` when the tick opened a new bar.
    pub fn update(&mut self, ts_ms: i64, price: f64, volume: f64) -> bool {
        if ts_ms >= self.rollover_ms || self.bars.is_empty() {
            self.roll(ts_ms, Bar::from_tick(price, volume));
            return true;
        }

        if let Some(current) = self.bars.front_mut() {
            current.high = current.high.max(price);
            current.low = current.low.min(price);
            current.close = price;
            current.volume += volume;
        }
        false
    }

    /// Appends a completed historical bar whose bucket starts at `ts_ms`.
    /// Backfill feeds bars oldest-first, so each one becomes the new head.
    pub fn push_historical(&mut self, ts_ms: i64, bar: Bar) {
        self.roll(ts_ms, bar);
    }

    fn roll(&mut self, ts_ms: i64, bar: Bar) {
        if self.bars.len() == self.capacity {
            self.bars.pop_back();
        }
        self.bars.push_front(bar);

        let next = bucket_end(ts_ms, self.timeframe.millis());
        self.rollover_ms = self.rollover_ms.max(next);
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn rollover_ms(&self) -> i64 {
        self.rollover_ms
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.front()
    }

    /// Newest-first iterator over the populated bars.
    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.iter().copied().collect()
    }
}

/// Exclusive end of the bucket containing `ts_ms`.
pub fn bucket_end(ts_ms: i64, timeframe_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(timeframe_ms) + timeframe_ms
}
