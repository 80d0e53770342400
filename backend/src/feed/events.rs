use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use market::{Quote, Trade};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "ev")]
pub enum FeedEvent {
    #[serde(rename = "T")]
    Trade(TradeEvent),
    #[serde(rename = "Q")]
    Quote(QuoteEvent),
    #[serde(rename = "AM")]
    MinuteAggregate(AggregateEvent),
    #[serde(rename = "status")]
    Status(StatusEvent),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "s", default)]
    pub size: f64,
    #[serde(rename = "t")]
    pub ts_ms: i64,
}

impl TradeEvent {
    pub fn trade(&self) -> Trade {
        Trade {
            ts_ms: self.ts_ms,
            price: self.price,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuoteEvent {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "bp", default)]
    pub bid_price: f64,
    #[serde(rename = "bs", default)]
    pub bid_size: f64,
    #[serde(rename = "ap", default)]
    pub ask_price: f64,
    #[serde(rename = "as", default)]
    pub ask_size: f64,
    #[serde(rename = "t")]
    pub ts_ms: i64,
}

impl QuoteEvent {
    pub fn quote(&self) -> Quote {
        Quote {
            ts_ms: self.ts_ms,
            bid_price: self.bid_price,
            bid_size: self.bid_size,
            ask_price: self.ask_price,
            ask_size: self.ask_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregateEvent {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v", default)]
    pub volume: f64,
    #[serde(rename = "s")]
    pub start_ms: i64,
    #[serde(rename = "e")]
    pub end_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusEvent {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl StatusEvent {
    pub fn is_auth_failure(&self) -> bool {
        self.status == "auth_failed"
    }
}

/// Parses one feed text frame. The feed batches events into a JSON array;
/// a bare object is accepted too. Events of unknown type or shape are
/// dropped individually.
pub fn parse_feed_message(raw: &str) -> Result<Vec<FeedEvent>, serde_json::Error> {
    let values = match serde_json::from_str::<Value>(raw)? {
        Value::Array(items) => items,
        other => vec![other],
    };

    Ok(values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<FeedEvent>(v) {
            Ok(ev) => Some(ev),
            Err(e) => {
                debug!(error = %e, "skipping unrecognised feed event");
                None
            }
        })
        .collect())
}
