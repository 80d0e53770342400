use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};

use market::roster::SecurityRepository;
use market::{Security, SecurityId};

const SELECT_VALID_AT: &str = r#"
SELECT security_id, ticker, min_date, max_date
FROM securities
WHERE min_date <= ? AND (max_date IS NULL OR max_date > ?)
"#;

/// SQLx-backed security roster. Responsible only for persistence and row
/// mapping.
pub struct SqlxSecurityRepository {
    pool: AnyPool,
}

impl SqlxSecurityRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Inserts a roster row, replacing the ticker and end date of an existing
    /// row with the same id and start date.
    pub async fn upsert(&self, security: &Security) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO securities (security_id, ticker, min_date, max_date)
VALUES (?, ?, ?, ?)
ON CONFLICT (security_id, min_date)
DO UPDATE SET ticker = excluded.ticker, max_date = excluded.max_date;
"#,
        )
        .bind(security.security_id)
        .bind(security.ticker.clone())
        .bind(security.min_date.timestamp_millis())
        .bind(security.max_date.map(|d| d.timestamp_millis()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting security {}", security.security_id))?;

        Ok(())
    }

    async fn fetch_valid_at(
        &self,
        filter: &str,
        key: Key<'_>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>> {
        let sql = format!("{SELECT_VALID_AT} AND {filter} ORDER BY min_date DESC LIMIT 1;");
        let at_ms = at.timestamp_millis();

        let query = sqlx::query(&sql).bind(at_ms).bind(at_ms);
        let query = match key {
            Key::Id(id) => query.bind(id),
            Key::Ticker(t) => query.bind(t.to_string()),
        };

        match query.fetch_optional(&self.pool).await? {
            Some(r) => Ok(Some(row_to_security(&r)?)),
            None => Ok(None),
        }
    }
}

enum Key<'a> {
    Id(SecurityId),
    Ticker(&'a str),
}

#[async_trait]
impl SecurityRepository for SqlxSecurityRepository {
    async fn fetch_active(&self, as_of: DateTime<Utc>) -> anyhow::Result<Vec<Security>> {
        let sql = format!("{SELECT_VALID_AT} ORDER BY security_id, min_date;");
        let at_ms = as_of.timestamp_millis();

        let rows = sqlx::query(&sql)
            .bind(at_ms)
            .bind(at_ms)
            .fetch_all(&self.pool)
            .await?;

        // Overlapping rows for one id resolve to the most recent start.
        let mut by_id: BTreeMap<SecurityId, Security> = BTreeMap::new();
        for r in rows {
            match row_to_security(&r) {
                Ok(s) => {
                    by_id.insert(s.security_id, s);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed security row");
                }
            }
        }

        Ok(by_id.into_values().collect())
    }

    async fn fetch_by_id_at(
        &self,
        security_id: SecurityId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>> {
        self.fetch_valid_at("security_id = ?", Key::Id(security_id), at)
            .await
    }

    async fn fetch_by_ticker_at(
        &self,
        ticker: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Security>> {
        self.fetch_valid_at("ticker = ?", Key::Ticker(ticker), at)
            .await
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_security(r: &sqlx::any::AnyRow) -> anyhow::Result<Security> {
    let security_id: i64 = r.try_get("security_id")?;
    let ticker: String = r.try_get("ticker")?;
    if ticker.trim().is_empty() {
        return Err(anyhow!("empty ticker for security {security_id}"));
    }

    let min_date = ms_to_datetime(r.try_get("min_date")?).context("invalid min_date")?;
    let max_date = match r.try_get::<Option<i64>, _>("max_date")? {
        Some(ms) => Some(ms_to_datetime(ms).context("invalid max_date")?),
        None => None,
    };

    if max_date.is_some_and(|max| max <= min_date) {
        return Err(anyhow!("empty validity range for security {security_id}"));
    }

    Ok(Security {
        security_id,
        ticker,
        min_date,
        max_date,
    })
}

fn ms_to_datetime(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}
