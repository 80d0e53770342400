#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use market::provider::{BarQuery, MarketDataProvider, SortOrder};
use market::roster::SecurityRepository;
use market::{Bar, HistoricalBar, Quote, Security, SecurityDetails, SecurityId, Timeframe, Trade};

pub fn security(id: SecurityId, ticker: &str) -> Security {
    Security {
        security_id: id,
        ticker: ticker.into(),
        min_date: DateTime::UNIX_EPOCH,
        max_date: None,
    }
}

/// Monday 2024-03-18.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 18).unwrap()
}

pub fn flat_bar(ts_ms: i64, price: f64, volume: f64) -> HistoricalBar {
    HistoricalBar {
        ts_ms,
        bar: Bar::from_tick(price, volume),
    }
}

#[derive(Default)]
pub struct MockRoster {
    pub securities: Mutex<Vec<Security>>,
}

impl MockRoster {
    pub fn with(securities: Vec<Security>) -> Self {
        Self {
            securities: Mutex::new(securities),
        }
    }
}

#[async_trait]
impl SecurityRepository for MockRoster {
    async fn fetch_active(&self, as_of: DateTime<Utc>) -> anyhow::Result<Vec<Security>> {
        Ok(self
            .securities
            .lock()
            .iter()
            .filter(|s| s.is_valid_at(as_of))
            .cloned()
            .collect())
    }

    async fn fetch_by_id_at(
        &self,
        security_id: SecurityId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>> {
        Ok(self
            .securities
            .lock()
            .iter()
            .find(|s| s.security_id == security_id && s.is_valid_at(at))
            .cloned())
    }

    async fn fetch_by_ticker_at(
        &self,
        ticker: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>> {
        Ok(self
            .securities
            .lock()
            .iter()
            .find(|s| s.ticker == ticker && s.is_valid_at(at))
            .cloned())
    }
}

/// In-memory provider. Bars are stored oldest-first per (ticker, timeframe).
#[derive(Default)]
pub struct MockProvider {
    pub bars: Mutex<HashMap<(String, Timeframe), Vec<HistoricalBar>>>,
    pub trades: Mutex<HashMap<String, Vec<Trade>>>,
    pub details: Mutex<HashMap<String, SecurityDetails>>,
    pub failing: Mutex<HashSet<String>>,
}

impl MockProvider {
    pub fn set_bars(&self, ticker: &str, timeframe: Timeframe, mut bars: Vec<HistoricalBar>) {
        bars.sort_by_key(|b| b.ts_ms);
        self.bars.lock().insert((ticker.to_string(), timeframe), bars);
    }

    pub fn fail(&self, ticker: &str) {
        self.failing.lock().insert(ticker.to_string());
    }

    pub fn heal(&self, ticker: &str) {
        self.failing.lock().remove(ticker);
    }

    fn check(&self, ticker: &str) -> anyhow::Result<()> {
        if self.failing.lock().contains(ticker) {
            anyhow::bail!("provider returned 503 for {ticker}");
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn fetch_bars(&self, query: &BarQuery) -> anyhow::Result<Vec<HistoricalBar>> {
        self.check(&query.ticker)?;

        let mut out: Vec<HistoricalBar> = self
            .bars
            .lock()
            .get(&(query.ticker.clone(), query.timeframe))
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.ts_ms >= query.from_ms && b.ts_ms <= query.to_ms)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        if query.order == SortOrder::Desc {
            out.reverse();
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn fetch_trades(
        &self,
        ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Trade>> {
        self.check(ticker)?;
        Ok(self
            .trades
            .lock()
            .get(ticker)
            .map(|t| {
                t.iter()
                    .filter(|t| t.ts_ms >= from_ms && t.ts_ms < to_ms)
                    .take(limit)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_quotes(
        &self,
        ticker: &str,
        _from_ms: i64,
        _to_ms: i64,
        _limit: usize,
    ) -> anyhow::Result<Vec<Quote>> {
        self.check(ticker)?;
        Ok(Vec::new())
    }

    async fn last_trade_before(&self, ticker: &str, at_ms: i64) -> anyhow::Result<Option<Trade>> {
        self.check(ticker)?;
        Ok(self
            .trades
            .lock()
            .get(ticker)
            .and_then(|t| t.iter().rev().find(|t| t.ts_ms <= at_ms).copied()))
    }

    async fn last_quote_before(&self, ticker: &str, _at_ms: i64) -> anyhow::Result<Option<Quote>> {
        self.check(ticker)?;
        Ok(None)
    }

    async fn fetch_details(&self, ticker: &str) -> anyhow::Result<Option<SecurityDetails>> {
        self.check(ticker)?;
        Ok(self.details.lock().get(ticker).cloned())
    }
}
