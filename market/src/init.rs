//! AggregateInitializer
//!
//! Rebuilds the whole aggregate store from historical data:
//!   • read the active roster
//!   • fan security ids over a fixed pool of workers through a job channel
//!   • each worker backfills buffers, derived stats and the burst profile
//!   • collect every result, then swap the new map in one step
//!
//! A single failed security fails the whole run. The previous store stays
//! installed and ingestion resumes against it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use common::logger::{TraceId, root_span, warn_if_slow};
use common::time::{MS_PER_DAY, to_utc};

use crate::buffer::DEFAULT_CAPACITY;
use crate::error::{InitFailure, MarketError};
use crate::provider::{BarQuery, MarketDataProvider, SortOrder};
use crate::roster::SecurityRepository;
use crate::state::{DAILY_STATS_BARS, DerivedStats, SecurityAggregateState};
use crate::store::{AggregateSnapshot, AggregateStore};
use crate::threshold::{PROFILE_LOOKBACK_DAYS, compute_profile};
use crate::types::{Security, Timeframe};

pub const DEFAULT_WORKERS: usize = 30;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct InitConfig {
    pub workers: usize,
    pub capacity: usize,
    pub timeframes: Vec<Timeframe>,
    pub fetch_timeout: Duration,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            capacity: DEFAULT_CAPACITY,
            timeframes: Timeframe::ALL.to_vec(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InitSummary {
    pub securities: usize,
    pub elapsed: Duration,
}

type WorkerResult = Result<SecurityAggregateState, InitFailure>;

pub struct AggregateInitializer {
    store: Arc<AggregateStore>,
    roster: Arc<dyn SecurityRepository>,
    provider: Arc<dyn MarketDataProvider>,
    config: Arc<InitConfig>,
}

impl AggregateInitializer {
    pub fn new(
        store: Arc<AggregateStore>,
        roster: Arc<dyn SecurityRepository>,
        provider: Arc<dyn MarketDataProvider>,
        config: InitConfig,
    ) -> Self {
        Self {
            store,
            roster,
            provider,
            config: Arc::new(config),
        }
    }

    /// Runs one full (re)initialization as of `now_ms`.
    pub async fn run(&self, now_ms: i64) -> Result<InitSummary, MarketError> {
        if !self.store.begin_initialization() {
            return Err(MarketError::InitializationInProgress);
        }

        let span = root_span("aggregate_init", &TraceId::default());
        let started = Instant::now();

        match self.build(now_ms).instrument(span).await {
            Ok(snapshot) => {
                let securities = snapshot.len();
                self.store.swap(snapshot);
                let summary = InitSummary {
                    securities,
                    elapsed: started.elapsed(),
                };
                info!(
                    securities,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "aggregate initialization complete"
                );
                Ok(summary)
            }
            Err(e) => {
                self.store.abort_initialization();
                error!(error = %e, "aggregate initialization failed");
                Err(e)
            }
        }
    }

    async fn build(&self, now_ms: i64) -> Result<AggregateSnapshot, MarketError> {
        let securities = self
            .roster
            .fetch_active(to_utc(now_ms))
            .await
            .map_err(|e| MarketError::Roster(format!("{e:#}")))?;

        info!(count = securities.len(), "backfilling active securities");

        let (job_tx, job_rx) = mpsc::channel::<Security>(securities.len().max(1));
        for security in securities {
            // Capacity covers the whole roster, so this never waits.
            if job_tx.send(security).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let workers = self.config.workers.max(1);
        let (res_tx, mut res_rx) = mpsc::channel::<WorkerResult>(workers * 2);

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let jobs = Arc::clone(&job_rx);
            let results = res_tx.clone();
            let provider = Arc::clone(&self.provider);
            let config = Arc::clone(&self.config);

            set.spawn(
                async move {
                    loop {
                        let job = { jobs.lock().await.recv().await };
                        let Some(security) = job else { break };

                        let result = backfill_security(&*provider, &config, security, now_ms).await;
                        if results.send(result).await.is_err() {
                            break;
                        }
                    }
                    debug!(worker_id, "init worker finished");
                }
                .in_current_span(),
            );
        }
        drop(res_tx);

        let mut states = Vec::new();
        let mut failures = Vec::new();
        while let Some(result) = res_rx.recv().await {
            match result {
                Ok(state) => states.push(state),
                Err(failure) => {
                    warn!(
                        security_id = failure.security_id,
                        ticker = %failure.ticker,
                        reason = %failure.reason,
                        "security backfill failed"
                    );
                    failures.push(failure);
                }
            }
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                failures.push(InitFailure {
                    security_id: -1,
                    ticker: String::new(),
                    reason: format!("init worker panicked: {e}"),
                });
            }
        }

        if !failures.is_empty() {
            return Err(MarketError::InitializationFailed { failures });
        }
        Ok(AggregateSnapshot::new(states))
    }
}

/// How far back to look for `capacity` bars of `timeframe`.
fn lookback_ms(timeframe: Timeframe, capacity: usize) -> i64 {
    (timeframe.millis() * capacity as i64 * 3).max(5 * MS_PER_DAY)
}

async fn fetch<T>(
    ticker: &str,
    timeout: Duration,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, MarketError> {
    match tokio::time::timeout(timeout, warn_if_slow("provider_fetch", timeout / 2, fut)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(MarketError::UpstreamFetch {
            ticker: ticker.to_string(),
            reason: format!("{e:#}"),
        }),
        Err(_) => Err(MarketError::UpstreamFetch {
            ticker: ticker.to_string(),
            reason: format!("timed out after {}ms", timeout.as_millis()),
        }),
    }
}

async fn backfill_security(
    provider: &dyn MarketDataProvider,
    config: &InitConfig,
    security: Security,
    now_ms: i64,
) -> WorkerResult {
    let security_id = security.security_id;
    let ticker = security.ticker.clone();

    build_state(provider, config, security, now_ms)
        .await
        .map_err(|e| InitFailure {
            security_id,
            ticker,
            reason: e.to_string(),
        })
}

async fn build_state(
    provider: &dyn MarketDataProvider,
    config: &InitConfig,
    security: Security,
    now_ms: i64,
) -> Result<SecurityAggregateState, MarketError> {
    let ticker = security.ticker.clone();
    let timeout = config.fetch_timeout;
    let mut state = SecurityAggregateState::new(security, &config.timeframes, config.capacity);

    for (timeframe, buffer) in state.buffers() {
        let query = BarQuery {
            ticker: ticker.clone(),
            timeframe,
            from_ms: now_ms - lookback_ms(timeframe, config.capacity),
            to_ms: now_ms,
            order: SortOrder::Desc,
            limit: Some(config.capacity * 3),
        };
        let mut bars = fetch(&ticker, timeout, provider.fetch_bars(&query)).await?;

        bars.retain(|b| timeframe.accepts(b.ts_ms));
        bars.truncate(config.capacity);

        let mut buf = buffer.write();
        for hb in bars.iter().rev() {
            buf.push_historical(hb.ts_ms, hb.bar);
        }
    }

    let profile_query = BarQuery {
        ticker: ticker.clone(),
        timeframe: Timeframe::SecondExtended,
        from_ms: now_ms - PROFILE_LOOKBACK_DAYS * MS_PER_DAY,
        to_ms: now_ms,
        order: SortOrder::Asc,
        limit: None,
    };
    let seconds = fetch(&ticker, timeout, provider.fetch_bars(&profile_query)).await?;
    state.profile = compute_profile(&seconds);

    let daily_query = BarQuery {
        ticker: ticker.clone(),
        timeframe: Timeframe::Day,
        from_ms: now_ms - 2 * DAILY_STATS_BARS as i64 * MS_PER_DAY,
        to_ms: now_ms,
        order: SortOrder::Desc,
        limit: Some(DAILY_STATS_BARS),
    };
    let days = fetch(&ticker, timeout, provider.fetch_bars(&daily_query)).await?;
    let details = fetch(&ticker, timeout, provider.fetch_details(&ticker)).await?;
    let market_cap = details.and_then(|d| d.market_cap).unwrap_or(0.0);
    state.stats = DerivedStats::from_daily_bars(&days, market_cap);

    debug!(
        security_id = state.security_id(),
        ticker = %ticker,
        "security backfilled"
    );
    Ok(state)
}
