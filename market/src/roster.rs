use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Security, SecurityId};

/// Source of truth for which securities exist and what they were called.
#[async_trait]
pub trait SecurityRepository: Send + Sync {
    /// Rows valid at `as_of`, one per security id.
    async fn fetch_active(&self, as_of: DateTime<Utc>) -> anyhow::Result<Vec<Security>>;

    async fn fetch_by_id_at(
        &self,
        security_id: SecurityId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>>;

    async fn fetch_by_ticker_at(
        &self,
        ticker: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>>;
}
