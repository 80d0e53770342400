mod support;

use std::sync::Arc;

use common::time::at_local;
use market::burst::{BurstDetector, DEFAULT_COOLDOWN_MS};
use market::ingest::TickIngestor;
use market::state::SecurityAggregateState;
use market::store::{AggregateSnapshot, AggregateStore};
use market::threshold::{BurstThresholdProfile, TradingPeriod};
use market::{MarketError, Timeframe, Trade};

use support::{monday, security};

fn eleven_am() -> i64 {
    at_local(monday(), 11 * 3600)
}

fn store_with_profiles() -> Arc<AggregateStore> {
    let mut hot = SecurityAggregateState::new(security(1, "HOT"), &[Timeframe::SecondExtended], 100);
    hot.profile.volume_threshold[TradingPeriod::MiddayEarly.index()] = 100.0;
    hot.profile.price_threshold[TradingPeriod::MiddayEarly.index()] = 0.01;

    // No baseline at all.
    let cold = SecurityAggregateState::new(security(2, "COLD"), &[Timeframe::SecondExtended], 100);

    let mut quiet = SecurityAggregateState::new(security(3, "QUIET"), &[Timeframe::SecondExtended], 100);
    quiet.profile = BurstThresholdProfile {
        volume_threshold: [1e9; 7],
        price_threshold: [1.0; 7],
    };

    let store = Arc::new(AggregateStore::new());
    store.begin_initialization();
    store.swap(AggregateSnapshot::new(vec![hot, cold, quiet]));
    store
}

fn trade(ts_ms: i64, price: f64, size: f64) -> Trade {
    Trade { ts_ms, price, size }
}

fn feed_spike(ingestor: &TickIngestor, id: i64, at: i64) {
    ingestor.ingest_trade(id, &trade(at - 10_000, 10.0, 80.0)).unwrap();
    ingestor.ingest_trade(id, &trade(at - 5_000, 10.2, 40.0)).unwrap();
}

#[test]
fn spike_above_both_thresholds_fires_once() {
    let store = store_with_profiles();
    let ingestor = TickIngestor::new(store.clone());
    let detector = BurstDetector::new(store, DEFAULT_COOLDOWN_MS);
    let now = eleven_am();

    for id in 1..=3 {
        feed_spike(&ingestor, id, now);
    }

    let bursts = detector.sweep(now);
    assert_eq!(bursts.len(), 1);

    let burst = &bursts[0];
    assert_eq!(burst.security_id, 1);
    assert_eq!(burst.ticker, "HOT");
    assert_eq!(burst.period, TradingPeriod::MiddayEarly);
    assert_eq!(burst.volume, 120.0);
    assert!((burst.price_range - 0.02).abs() < 1e-9);
    assert_eq!(burst.volume_threshold, 100.0);

    // Same burst, still inside the cooldown.
    assert!(detector.sweep(now + 1_000).is_empty());
}

#[test]
fn burst_fires_again_after_cooldown() {
    let store = store_with_profiles();
    let ingestor = TickIngestor::new(store.clone());
    let detector = BurstDetector::new(store, DEFAULT_COOLDOWN_MS);
    let now = eleven_am();

    feed_spike(&ingestor, 1, now);
    assert!(detector.evaluate(1, now).unwrap().is_some());

    let later = now + DEFAULT_COOLDOWN_MS;
    feed_spike(&ingestor, 1, later);
    assert!(detector.evaluate(1, later).unwrap().is_some());
}

#[test]
fn volume_alone_does_not_fire() {
    let store = store_with_profiles();
    let ingestor = TickIngestor::new(store.clone());
    let detector = BurstDetector::new(store, DEFAULT_COOLDOWN_MS);
    let now = eleven_am();

    ingestor.ingest_trade(1, &trade(now - 1_000, 10.0, 500.0)).unwrap();
    assert_eq!(detector.evaluate(1, now).unwrap(), None);
}

#[test]
fn stale_tape_does_not_fire() {
    let store = store_with_profiles();
    let ingestor = TickIngestor::new(store.clone());
    let detector = BurstDetector::new(store, DEFAULT_COOLDOWN_MS);
    let now = eleven_am();

    feed_spike(&ingestor, 1, now);
    assert!(detector.sweep(now + 30_000).is_empty());
}

#[test]
fn nothing_fires_outside_the_extended_session() {
    let store = store_with_profiles();
    let ingestor = TickIngestor::new(store.clone());
    let detector = BurstDetector::new(store, DEFAULT_COOLDOWN_MS);
    let late = at_local(monday(), 21 * 3600);

    feed_spike(&ingestor, 1, late);
    assert!(detector.sweep(late).is_empty());
}

#[test]
fn detector_reports_store_errors() {
    let detector = BurstDetector::new(Arc::new(AggregateStore::new()), DEFAULT_COOLDOWN_MS);
    assert!(matches!(detector.evaluate(1, 0), Err(MarketError::NotReady)));
    assert!(detector.sweep(eleven_am()).is_empty());
}
