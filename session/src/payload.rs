//! JSON bodies carried in the `data` field of outbound frames.

use serde::Serialize;

use market::{Quote, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePayload {
    pub price: f64,
    pub size: f64,
    pub timestamp: i64,
}

impl From<&Trade> for TradePayload {
    fn from(t: &Trade) -> Self {
        Self {
            price: t.price,
            size: t.size,
            timestamp: t.ts_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePayload {
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
    pub timestamp: i64,
}

impl From<&Quote> for QuotePayload {
    fn from(q: &Quote) -> Self {
        Self {
            bid_price: q.bid_price,
            bid_size: q.bid_size,
            ask_price: q.ask_price,
            ask_size: q.ask_size,
            timestamp: q.ts_ms,
        }
    }
}

/// Session close price. `timestamp` is the close time, not the trade time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePayload {
    pub price: f64,
    pub timestamp: i64,
}

/// Body used on `{id}-all`, which carries both trades and quotes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TickPayload {
    Trade(TradePayload),
    Quote(QuotePayload),
}
