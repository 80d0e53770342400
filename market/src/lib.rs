pub mod buffer;
pub mod burst;
pub mod error;
pub mod ingest;
pub mod init;
pub mod provider;
pub mod roster;
pub mod state;
pub mod store;
pub mod threshold;
pub mod types;

pub use error::{InitFailure, MarketError};
pub use types::{Bar, HistoricalBar, Quote, Security, SecurityDetails, SecurityId, Timeframe, Trade};
