use thiserror::Error;

use crate::types::{SecurityId, Timeframe};

/// One security that could not be backfilled during initialization.
#[derive(Debug, Clone)]
pub struct InitFailure {
    pub security_id: SecurityId,
    pub ticker: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("aggregate store is not ready (initialization in progress)")]
    NotReady,

    #[error("unknown security: {0}")]
    UnknownSecurity(SecurityId),

    #[error("timeframe {timeframe} is not enabled for security {security_id}")]
    TimeframeDisabled {
        security_id: SecurityId,
        timeframe: Timeframe,
    },

    #[error("upstream fetch failed for {ticker}: {reason}")]
    UpstreamFetch { ticker: String, reason: String },

    #[error("another initialization is already running")]
    InitializationInProgress,

    #[error("initialization failed for {} securities", .failures.len())]
    InitializationFailed { failures: Vec<InitFailure> },

    #[error("security roster unavailable: {0}")]
    Roster(String),
}
