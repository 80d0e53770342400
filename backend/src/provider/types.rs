//! Wire shapes of the REST API. Field names follow the provider.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use market::{Bar, HistoricalBar, Quote, Trade};

pub const NANOS_PER_MS: i64 = 1_000_000;

#[derive(Debug, Deserialize)]
pub struct AggsEnvelope {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub results: Vec<AggRecord>,
    /// Link to the next page; absent on the last one.
    #[serde(default)]
    pub next_url: Option<String>,
}

/// One page of a listing that may continue at `next_url`.
pub trait Paged: DeserializeOwned {
    type Record;

    /// The page's records and follow-up link, or the provider's error status.
    fn into_page(self) -> Result<(Vec<Self::Record>, Option<String>), String>;
}

impl Paged for AggsEnvelope {
    type Record = AggRecord;

    fn into_page(self) -> Result<(Vec<AggRecord>, Option<String>), String> {
        if self.status == "ERROR" {
            return Err(self.status);
        }
        Ok((self.results, self.next_url))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AggRecord {
    #[serde(rename = "t")]
    pub ts_ms: i64,
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
}

impl From<AggRecord> for HistoricalBar {
    fn from(r: AggRecord) -> Self {
        HistoricalBar {
            ts_ms: r.ts_ms,
            bar: Bar {
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub next_url: Option<String>,
}

impl<T: DeserializeOwned> Paged for ListEnvelope<T> {
    type Record = T;

    fn into_page(self) -> Result<(Vec<T>, Option<String>), String> {
        Ok((self.results, self.next_url))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TradeRecord {
    pub sip_timestamp: i64,
    pub price: f64,
    #[serde(default)]
    pub size: f64,
}

impl From<TradeRecord> for Trade {
    fn from(r: TradeRecord) -> Self {
        Trade {
            ts_ms: r.sip_timestamp / NANOS_PER_MS,
            price: r.price,
            size: r.size,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuoteRecord {
    pub sip_timestamp: i64,
    #[serde(default)]
    pub bid_price: f64,
    #[serde(default)]
    pub bid_size: f64,
    #[serde(default)]
    pub ask_price: f64,
    #[serde(default)]
    pub ask_size: f64,
}

impl From<QuoteRecord> for Quote {
    fn from(r: QuoteRecord) -> Self {
        Quote {
            ts_ms: r.sip_timestamp / NANOS_PER_MS,
            bid_price: r.bid_price,
            bid_size: r.bid_size,
            ask_price: r.ask_price,
            ask_size: r.ask_size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DetailsEnvelope {
    pub results: Option<DetailsRecord>,
}

#[derive(Debug, Deserialize)]
pub struct DetailsRecord {
    pub market_cap: Option<f64>,
}
