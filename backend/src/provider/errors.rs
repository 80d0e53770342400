use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream status {status} for {ticker}")]
    Status { ticker: String, status: String },

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),
}
