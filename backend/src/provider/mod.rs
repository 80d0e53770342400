pub mod client;
pub mod errors;
pub mod types;

pub use client::RestMarketDataClient;
pub use errors::ProviderError;
