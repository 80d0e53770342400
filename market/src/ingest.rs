use std::sync::Arc;

use tracing::trace;

use crate::error::MarketError;
use crate::store::AggregateStore;
use crate::types::{SecurityId, Timeframe, Trade};

/// Hot path for live ticks.
///
/// Never waits on initialization: while the store is being rebuilt every call
/// returns [`MarketError::NotReady`] and the tick is dropped.
#[derive(Clone)]
pub struct TickIngestor {
    store: Arc<AggregateStore>,
}

impl TickIngestor {
    pub fn new(store: Arc<AggregateStore>) -> Self {
        Self { store }
    }

    /// Applies one tick to a single timeframe. Returns `true` on rollover.
    pub fn ingest(
        &self,
        security_id: SecurityId,
        ts_ms: i64,
        price: f64,
        volume: f64,
        timeframe: Timeframe,
    ) -> Result<bool, MarketError> {
        let state = self.store.get(security_id)?;
        let buffer = state
            .buffer(timeframe)
            .ok_or(MarketError::TimeframeDisabled {
                security_id,
                timeframe,
            })?;

        let rolled = buffer.write().update(ts_ms, price, volume);
        Ok(rolled)
    }

    /// Applies a trade to every enabled timeframe whose session hours accept
    /// it and appends it to the tape window. Returns the timeframes updated.
    pub fn ingest_trade(
        &self,
        security_id: SecurityId,
        trade: &Trade,
    ) -> Result<Vec<Timeframe>, MarketError> {
        let state = self.store.get(security_id)?;

        let mut updated = Vec::new();
        for (timeframe, buffer) in state.buffers() {
            if !timeframe.accepts(trade.ts_ms) {
                continue;
            }
            buffer.write().update(trade.ts_ms, trade.price, trade.size);
            updated.push(timeframe);
        }

        state.tape().lock().push(trade.ts_ms, trade.price, trade.size);

        trace!(security_id, ts_ms = trade.ts_ms, updated = updated.len(), "trade ingested");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SecurityAggregateState;
    use crate::store::AggregateSnapshot;
    use crate::types::Security;

    fn ready_store(timeframes: &[Timeframe]) -> Arc<AggregateStore> {
        let store = Arc::new(AggregateStore::new());
        let state = SecurityAggregateState::new(
            Security {
                security_id: 42,
                ticker: "XYZ".into(),
                min_date: chrono::DateTime::UNIX_EPOCH,
                max_date: None,
            },
            timeframes,
            100,
        );
        store.begin_initialization();
        store.swap(AggregateSnapshot::new(vec![state]));
        store
    }

    #[test]
    fn ingest_before_initialization_fails_fast() {
        let ingestor = TickIngestor::new(Arc::new(AggregateStore::new()));
        let err = ingestor.ingest(42, 0, 1.0, 1.0, Timeframe::Hour).unwrap_err();
        assert!(matches!(err, MarketError::NotReady));
    }

    #[test]
    fn ingest_unknown_security() {
        let ingestor = TickIngestor::new(ready_store(&[Timeframe::Hour]));
        let err = ingestor.ingest(7, 0, 1.0, 1.0, Timeframe::Hour).unwrap_err();
        assert!(matches!(err, MarketError::UnknownSecurity(7)));
    }

    #[test]
    fn ingest_disabled_timeframe() {
        let ingestor = TickIngestor::new(ready_store(&[Timeframe::Hour]));
        let err = ingestor.ingest(42, 0, 1.0, 1.0, Timeframe::Day).unwrap_err();
        assert!(matches!(
            err,
            MarketError::TimeframeDisabled {
                security_id: 42,
                timeframe: Timeframe::Day
            }
        ));
    }

    #[test]
    fn minute_scenario_through_ingestor() {
        let store = ready_store(&[Timeframe::MinuteExtended]);
        let ingestor = TickIngestor::new(store.clone());

        assert!(ingestor.ingest(42, 0, 10.0, 100.0, Timeframe::MinuteExtended).unwrap());
        assert!(!ingestor.ingest(42, 10_000, 12.0, 50.0, Timeframe::MinuteExtended).unwrap());
        assert!(ingestor.ingest(42, 65_000, 11.0, 5.0, Timeframe::MinuteExtended).unwrap());

        let bars = store.get(42).unwrap().bars(Timeframe::MinuteExtended).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].volume, 150.0);
    }

    #[test]
    fn trade_outside_regular_hours_skips_regular_timeframes() {
        let store = ready_store(&[Timeframe::Minute, Timeframe::MinuteExtended]);
        let ingestor = TickIngestor::new(store.clone());

        // 1970-01-01 00:00 UTC is 19:00 the previous evening in New York.
        let trade = Trade {
            ts_ms: 0,
            price: 3.0,
            size: 10.0,
        };
        let updated = ingestor.ingest_trade(42, &trade).unwrap();
        assert_eq!(updated, vec![Timeframe::MinuteExtended]);

        let state = store.get(42).unwrap();
        assert_eq!(state.tape().lock().volume(), 10.0);
        assert_eq!(state.bars(Timeframe::Minute), Some(vec![]));
    }
}
