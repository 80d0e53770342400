use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{HistoricalBar, Quote, SecurityDetails, Timeframe, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Historical bar request. `from_ms`/`to_ms` are inclusive; `limit = None`
/// asks for the whole range.
#[derive(Debug, Clone, PartialEq)]
pub struct BarQuery {
    pub ticker: String,
    pub timeframe: Timeframe,
    pub from_ms: i64,
    pub to_ms: i64,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

/// Upstream market data, addressed by ticker.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_bars(&self, query: &BarQuery) -> anyhow::Result<Vec<HistoricalBar>>;

    /// Trades in `[from_ms, to_ms)`, oldest first. At most `limit` are
    /// returned; below that the whole range is.
    async fn fetch_trades(
        &self,
        ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Trade>>;

    /// Quotes in `[from_ms, to_ms)`, oldest first.
    async fn fetch_quotes(
        &self,
        ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Quote>>;

    /// Most recent trade at or before `at_ms`.
    async fn last_trade_before(&self, ticker: &str, at_ms: i64) -> anyhow::Result<Option<Trade>>;

    async fn last_quote_before(&self, ticker: &str, at_ms: i64) -> anyhow::Result<Option<Quote>>;

    async fn fetch_details(&self, ticker: &str) -> anyhow::Result<Option<SecurityDetails>>;
}
