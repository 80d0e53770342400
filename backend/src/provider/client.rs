use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use market::provider::{BarQuery, MarketDataProvider, SortOrder};
use market::{HistoricalBar, Quote, SecurityDetails, Timeframe, Trade};

use crate::provider::errors::ProviderError;
use crate::provider::types::{
    AggsEnvelope, DetailsEnvelope, ListEnvelope, NANOS_PER_MS, Paged, QuoteRecord, TradeRecord,
};

/// Largest page the provider serves in one call; longer listings continue
/// at the page's `next_url`.
const MAX_LIMIT: usize = 50_000;

/// Historical market data over the provider's REST API.
#[derive(Clone)]
pub struct RestMarketDataClient {
    http: Client,
    url: String,
    api_key: String,
}

impl RestMarketDataClient {
    pub fn new(url: String, api_key: String) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        mut query: Vec<(&'static str, String)>,
    ) -> Result<Option<T>, ProviderError> {
        query.push(("apiKey", self.api_key.clone()));
        let resp = self.http.get(url).query(&query).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json().await?))
    }

    /// Follows `next_url` from the first page at `path` until the listing
    /// ends or `cap` records are in hand.
    async fn paged<E: Paged>(
        &self,
        ticker: &str,
        path: &str,
        mut query: Vec<(&'static str, String)>,
        cap: usize,
    ) -> Result<Vec<E::Record>, ProviderError> {
        let mut records = Vec::new();
        if cap == 0 {
            return Ok(records);
        }
        query.push(("limit", cap.min(MAX_LIMIT).to_string()));

        let mut url = format!("{}{}", self.url, path);
        let mut pages = 0usize;
        loop {
            // The link already carries the cursor and the rest of the query.
            let params = if pages == 0 { std::mem::take(&mut query) } else { Vec::new() };
            let Some(envelope) = self.get::<E>(&url, params).await? else {
                break;
            };
            pages += 1;

            let (page, next) = envelope.into_page().map_err(|status| ProviderError::Status {
                ticker: ticker.to_string(),
                status,
            })?;
            let empty = page.is_empty();
            records.extend(page);

            match next {
                Some(next) if !empty && records.len() < cap => url = next,
                _ => break,
            }
        }

        records.truncate(cap);
        debug!(pages, count = records.len(), "listing fetched");
        Ok(records)
    }

    #[instrument(
        skip(self, query),
        fields(ticker = %query.ticker, timeframe = %query.timeframe),
        level = "debug"
    )]
    pub async fn bars(&self, query: &BarQuery) -> Result<Vec<HistoricalBar>, ProviderError> {
        let (multiplier, span) = range_of(query.timeframe);
        let path = format!(
            "/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            query.ticker, multiplier, span, query.from_ms, query.to_ms
        );
        let params = vec![
            ("adjusted", "true".into()),
            ("sort", query.order.as_str().into()),
        ];

        let records = self
            .paged::<AggsEnvelope>(&query.ticker, &path, params, query.limit.unwrap_or(usize::MAX))
            .await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    /// Records from a `/v3/{kind}/{ticker}` listing in the given order.
    async fn ticks<R: DeserializeOwned>(
        &self,
        kind: &str,
        ticker: &str,
        range: Vec<(&'static str, String)>,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<R>, ProviderError> {
        let mut query = range;
        query.push(("order", order.as_str().into()));
        query.push(("sort", "timestamp".into()));

        self.paged::<ListEnvelope<R>>(ticker, &format!("/v3/{kind}/{ticker}"), query, limit)
            .await
    }

    #[instrument(skip(self), fields(ticker = %ticker), level = "debug")]
    pub async fn trades(
        &self,
        ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> Result<Vec<Trade>, ProviderError> {
        let records: Vec<TradeRecord> = self
            .ticks("trades", ticker, half_open(from_ms, to_ms), SortOrder::Asc, limit)
            .await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(ticker = %ticker), level = "debug")]
    pub async fn quotes(
        &self,
        ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> Result<Vec<Quote>, ProviderError> {
        let records: Vec<QuoteRecord> = self
            .ticks("quotes", ticker, half_open(from_ms, to_ms), SortOrder::Asc, limit)
            .await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(ticker = %ticker), level = "debug")]
    pub async fn last_trade(&self, ticker: &str, at_ms: i64) -> Result<Option<Trade>, ProviderError> {
        let records: Vec<TradeRecord> = self
            .ticks("trades", ticker, at_or_before(at_ms), SortOrder::Desc, 1)
            .await?;
        Ok(records.into_iter().next().map(Into::into))
    }

    #[instrument(skip(self), fields(ticker = %ticker), level = "debug")]
    pub async fn last_quote(&self, ticker: &str, at_ms: i64) -> Result<Option<Quote>, ProviderError> {
        let records: Vec<QuoteRecord> = self
            .ticks("quotes", ticker, at_or_before(at_ms), SortOrder::Desc, 1)
            .await?;
        Ok(records.into_iter().next().map(Into::into))
    }

    #[instrument(skip(self), fields(ticker = %ticker), level = "debug")]
    pub async fn details(&self, ticker: &str) -> Result<Option<SecurityDetails>, ProviderError> {
        let envelope: Option<DetailsEnvelope> = self
            .get(&format!("{}/v3/reference/tickers/{ticker}", self.url), Vec::new())
            .await?;

        Ok(envelope.and_then(|e| e.results).map(|r| SecurityDetails {
            market_cap: r.market_cap,
        }))
    }
}

fn range_of(tf: Timeframe) -> (u32, &'static str) {
    match tf {
        Timeframe::Second | Timeframe::SecondExtended => (1, "second"),
        Timeframe::Minute | Timeframe::MinuteExtended => (1, "minute"),
        Timeframe::Hour => (1, "hour"),
        Timeframe::Day => (1, "day"),
    }
}

fn half_open(from_ms: i64, to_ms: i64) -> Vec<(&'static str, String)> {
    vec![
        ("timestamp.gte", (from_ms * NANOS_PER_MS).to_string()),
        ("timestamp.lt", (to_ms * NANOS_PER_MS).to_string()),
    ]
}

fn at_or_before(at_ms: i64) -> Vec<(&'static str, String)> {
    vec![("timestamp.lte", (at_ms * NANOS_PER_MS).to_string())]
}

#[async_trait]
impl MarketDataProvider for RestMarketDataClient {
    async fn fetch_bars(&self, query: &BarQuery) -> anyhow::Result<Vec<HistoricalBar>> {
        Ok(self.bars(query).await?)
    }

    async fn fetch_trades(
        &self,
        ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Trade>> {
        Ok(self.trades(ticker, from_ms, to_ms, limit).await?)
    }

    async fn fetch_quotes(
        &self,
        ticker: &str,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Quote>> {
        Ok(self.quotes(ticker, from_ms, to_ms, limit).await?)
    }

    async fn last_trade_before(&self, ticker: &str, at_ms: i64) -> anyhow::Result<Option<Trade>> {
        Ok(self.last_trade(ticker, at_ms).await?)
    }

    async fn last_quote_before(&self, ticker: &str, at_ms: i64) -> anyhow::Result<Option<Quote>> {
        Ok(self.last_quote(ticker, at_ms).await?)
    }

    async fn fetch_details(&self, ticker: &str) -> anyhow::Result<Option<SecurityDetails>> {
        Ok(self.details(ticker).await?)
    }
}
