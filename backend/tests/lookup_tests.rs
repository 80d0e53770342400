use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use backend::lookup::{ProviderLookup, SPAN_LIMIT};
use market::provider::{BarQuery, MarketDataProvider};
use market::roster::SecurityRepository;
use market::{HistoricalBar, Quote, Security, SecurityDetails, SecurityId, Trade};
use session::initial::InitialValueResolver;
use session::replay::ReplaySource;
use session::{ChannelName, SecurityChannel};

/// Monday 2024-03-18 10:00 EDT.
const TEN_AM: i64 = 1_710_770_400_000;
/// Same day 08:00 EDT.
const PREMARKET: i64 = 1_710_763_200_000;
/// Friday 2024-03-15 16:00 EDT.
const FRIDAY_CLOSE: i64 = 1_710_532_800_000;

struct OneSecurity;

#[async_trait]
impl SecurityRepository for OneSecurity {
    async fn fetch_active(&self, _as_of: DateTime<Utc>) -> anyhow::Result<Vec<Security>> {
        Ok(vec![security()])
    }

    async fn fetch_by_id_at(
        &self,
        security_id: SecurityId,
        _at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>> {
        Ok((security_id == 1).then(security))
    }

    async fn fetch_by_ticker_at(
        &self,
        ticker: &str,
        _at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>> {
        Ok((ticker == "AAPL").then(security))
    }
}

fn security() -> Security {
    Security {
        security_id: 1,
        ticker: "AAPL".into(),
        min_date: DateTime::UNIX_EPOCH,
        max_date: None,
    }
}

/// Provider with a fixed tape; records the `at_ms` of every "last before" call.
#[derive(Default)]
struct Tape {
    trades: Vec<Trade>,
    quotes: Vec<Quote>,
    asked_at: Mutex<Vec<i64>>,
    range_limits: Mutex<Vec<usize>>,
}

#[async_trait]
impl MarketDataProvider for Tape {
    async fn fetch_bars(&self, _query: &BarQuery) -> anyhow::Result<Vec<HistoricalBar>> {
        Ok(Vec::new())
    }

    async fn fetch_trades(
        &self,
        _ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Trade>> {
        self.range_limits.lock().push(limit);
        Ok(self
            .trades
            .iter()
            .filter(|t| t.ts_ms >= from_ms && t.ts_ms < to_ms)
            .copied()
            .collect())
    }

    async fn fetch_quotes(
        &self,
        _ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Quote>> {
        self.range_limits.lock().push(limit);
        Ok(self
            .quotes
            .iter()
            .filter(|q| q.ts_ms >= from_ms && q.ts_ms < to_ms)
            .copied()
            .collect())
    }

    async fn last_trade_before(&self, _ticker: &str, at_ms: i64) -> anyhow::Result<Option<Trade>> {
        self.asked_at.lock().push(at_ms);
        Ok(self.trades.iter().filter(|t| t.ts_ms <= at_ms).last().copied())
    }

    async fn last_quote_before(&self, _ticker: &str, at_ms: i64) -> anyhow::Result<Option<Quote>> {
        self.asked_at.lock().push(at_ms);
        Ok(self.quotes.iter().filter(|q| q.ts_ms <= at_ms).last().copied())
    }

    async fn fetch_details(&self, _ticker: &str) -> anyhow::Result<Option<SecurityDetails>> {
        Ok(None)
    }
}

fn trade(ts_ms: i64, price: f64) -> Trade {
    Trade {
        ts_ms,
        price,
        size: 1.0,
    }
}

fn quote(ts_ms: i64, bid_price: f64) -> Quote {
    Quote {
        ts_ms,
        bid_price,
        bid_size: 1.0,
        ask_price: bid_price + 0.1,
        ask_size: 1.0,
    }
}

fn channel(name: &str) -> SecurityChannel {
    *name.parse::<ChannelName>().unwrap().security().unwrap()
}

fn lookup(tape: Tape) -> (ProviderLookup, Arc<Tape>) {
    let tape = Arc::new(tape);
    (ProviderLookup::new(Arc::new(OneSecurity), tape.clone()), tape)
}

#[tokio::test]
async fn regular_quote_outside_hours_uses_last_close() {
    let (lookup, tape) = lookup(Tape {
        quotes: vec![quote(FRIDAY_CLOSE - 1_000, 10.0), quote(PREMARKET - 1_000, 11.0)],
        ..Tape::default()
    });

    let value = lookup
        .resolve(&channel("1-quote-regular"), PREMARKET)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["bidPrice"], 10.0);
    assert_eq!(tape.asked_at.lock().as_slice(), &[FRIDAY_CLOSE]);

    let value = lookup
        .resolve(&channel("1-quote-extended"), PREMARKET)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["bidPrice"], 11.0);
}

#[tokio::test]
async fn all_channel_initial_value_is_tagged_and_unknown_ids_resolve_empty() {
    let (lookup, _) = lookup(Tape {
        trades: vec![trade(TEN_AM - 5_000, 42.0)],
        ..Tape::default()
    });

    let value = lookup.resolve(&channel("1-all"), TEN_AM).await.unwrap().unwrap();
    assert_eq!(value["type"], "trade");
    assert_eq!(value["price"], 42.0);

    assert_eq!(lookup.resolve(&channel("2-fast"), TEN_AM).await.unwrap(), None);
}

#[tokio::test]
async fn close_channel_reports_session_close_time() {
    let (lookup, _) = lookup(Tape {
        trades: vec![trade(FRIDAY_CLOSE - 60_000, 7.5)],
        ..Tape::default()
    });

    let value = lookup
        .resolve(&channel("1-close-regular"), PREMARKET)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["price"], 7.5);
    assert_eq!(value["timestamp"], FRIDAY_CLOSE);
}

#[tokio::test]
async fn replay_merges_trades_and_quotes_in_time_order() {
    let (lookup, tape) = lookup(Tape {
        trades: vec![trade(TEN_AM + 300, 1.0), trade(TEN_AM + 100, 1.0)],
        quotes: vec![quote(TEN_AM + 200, 1.0), quote(TEN_AM + 60_000, 1.0)],
        ..Tape::default()
    });

    let events = lookup
        .fetch(&channel("1-all"), TEN_AM, TEN_AM + 1_000)
        .await
        .unwrap();
    let stamps: Vec<i64> = events.iter().map(|e| e.ts_ms - TEN_AM).collect();
    assert_eq!(stamps, vec![100, 200, 300]);
    assert_eq!(events[1].data["type"], "quote");

    let fast = lookup
        .fetch(&channel("1-fast"), TEN_AM, TEN_AM + 1_000)
        .await
        .unwrap();
    assert_eq!(fast.len(), 2);
    assert!(fast[0].data.get("type").is_none());

    // Spans are never cut short by a page size.
    assert_eq!(tape.range_limits.lock().as_slice(), &[SPAN_LIMIT; 3]);
}

#[tokio::test]
async fn replay_of_close_channel_emits_at_the_close() {
    let (lookup, _) = lookup(Tape {
        trades: vec![trade(FRIDAY_CLOSE - 60_000, 7.5)],
        ..Tape::default()
    });

    let events = lookup
        .fetch(&channel("1-close"), FRIDAY_CLOSE - 300_000, FRIDAY_CLOSE + 300_000)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ts_ms, FRIDAY_CLOSE);

    let none = lookup
        .fetch(&channel("1-close"), FRIDAY_CLOSE + 1, FRIDAY_CLOSE + 300_000)
        .await
        .unwrap();
    assert!(none.is_empty());
}
