use sqlx::AnyPool;

/// Creates the security roster. Dates are epoch milliseconds; a NULL
/// `max_date` marks the current row of a security.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS securities (
  security_id BIGINT NOT NULL,
  ticker TEXT NOT NULL,
  min_date BIGINT NOT NULL,
  max_date BIGINT,
  PRIMARY KEY (security_id, min_date)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_securities_ticker ON securities(ticker);"#)
        .execute(pool)
        .await?;

    Ok(())
}
