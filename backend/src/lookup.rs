//! Historical answers for clients: the first value of a channel and the
//! events a replay plays back. Both map a security id to the ticker valid at
//! the requested time before asking the provider.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use common::time::{last_session_close, to_utc};
use market::provider::MarketDataProvider;
use market::roster::SecurityRepository;
use market::{Quote, SecurityId, Trade};
use session::SecurityChannel;
use session::StreamType;
use session::initial::{InitialValueResolver, Lookup, lookup_for};
use session::payload::{ClosePayload, QuotePayload, TickPayload, TradePayload};
use session::replay::{ReplayEvent, ReplaySource};

/// Replay spans are fetched whole, however many pages that takes.
pub const SPAN_LIMIT: usize = usize::MAX;

pub struct ProviderLookup {
    roster: Arc<dyn SecurityRepository>,
    provider: Arc<dyn MarketDataProvider>,
}

impl ProviderLookup {
    pub fn new(roster: Arc<dyn SecurityRepository>, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { roster, provider }
    }

    async fn ticker_at(&self, security_id: SecurityId, at_ms: i64) -> anyhow::Result<Option<String>> {
        let security = self
            .roster
            .fetch_by_id_at(security_id, to_utc(at_ms))
            .await
            .with_context(|| format!("roster lookup for {security_id}"))?;

        if security.is_none() {
            debug!(security_id, at_ms, "no ticker valid at requested time");
        }
        Ok(security.map(|s| s.ticker))
    }

    /// Last trade at or before the close, stamped with the close time.
    async fn close_at(&self, ticker: &str, close_ms: i64) -> anyhow::Result<Option<ClosePayload>> {
        let trade = self.provider.last_trade_before(ticker, close_ms).await?;
        Ok(trade.map(|t| ClosePayload {
            price: t.price,
            timestamp: close_ms,
        }))
    }
}

fn trade_value(stream: StreamType, trade: &Trade) -> anyhow::Result<Value> {
    match stream {
        StreamType::All => to_value(&TickPayload::Trade(trade.into())),
        _ => to_value(&TradePayload::from(trade)),
    }
}

fn quote_value(stream: StreamType, quote: &Quote) -> anyhow::Result<Value> {
    match stream {
        StreamType::All => to_value(&TickPayload::Quote(quote.into())),
        _ => to_value(&QuotePayload::from(quote)),
    }
}

fn to_value<T: Serialize>(payload: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(payload)?)
}

#[async_trait]
impl InitialValueResolver for ProviderLookup {
    async fn resolve(&self, channel: &SecurityChannel, at_ms: i64) -> anyhow::Result<Option<Value>> {
        let Some(ticker) = self.ticker_at(channel.security_id, at_ms).await? else {
            return Ok(None);
        };

        match lookup_for(channel, at_ms) {
            Lookup::LastQuote { at_ms } => match self.provider.last_quote_before(&ticker, at_ms).await? {
                Some(q) => Ok(Some(quote_value(channel.stream, &q)?)),
                None => Ok(None),
            },
            Lookup::LastTrade { at_ms } => match self.provider.last_trade_before(&ticker, at_ms).await? {
                Some(t) => Ok(Some(trade_value(channel.stream, &t)?)),
                None => Ok(None),
            },
            Lookup::SessionClose { close_ms } => match self.close_at(&ticker, close_ms).await? {
                Some(close) => Ok(Some(to_value(&close)?)),
                None => Ok(None),
            },
        }
    }
}

#[async_trait]
impl ReplaySource for ProviderLookup {
    async fn fetch(
        &self,
        channel: &SecurityChannel,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<ReplayEvent>> {
        if to_ms <= from_ms {
            return Ok(Vec::new());
        }
        let Some(ticker) = self.ticker_at(channel.security_id, from_ms).await? else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        let stream = channel.stream;

        if matches!(stream, StreamType::Fast | StreamType::Slow | StreamType::All) {
            let trades = self
                .provider
                .fetch_trades(&ticker, from_ms, to_ms, SPAN_LIMIT)
                .await?;
            for t in &trades {
                events.push(ReplayEvent {
                    ts_ms: t.ts_ms,
                    data: trade_value(stream, t)?,
                });
            }
        }

        if matches!(stream, StreamType::Quote | StreamType::All) {
            let quotes = self
                .provider
                .fetch_quotes(&ticker, from_ms, to_ms, SPAN_LIMIT)
                .await?;
            for q in &quotes {
                events.push(ReplayEvent {
                    ts_ms: q.ts_ms,
                    data: quote_value(stream, q)?,
                });
            }
        }

        if stream == StreamType::Close {
            let extended = channel.hours.is_some_and(|h| h.is_extended());
            let close_ms = last_session_close(to_ms - 1, extended);
            if close_ms >= from_ms {
                if let Some(close) = self.close_at(&ticker, close_ms).await? {
                    events.push(ReplayEvent {
                        ts_ms: close_ms,
                        data: to_value(&close)?,
                    });
                }
            }
        }

        events.sort_by_key(|e| e.ts_ms);
        Ok(events)
    }
}
