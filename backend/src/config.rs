use std::str::FromStr;
use std::time::Duration;

use market::Timeframe;
use market::burst::DEFAULT_COOLDOWN_MS;
use market::init::{DEFAULT_WORKERS, InitConfig};
use session::ClientConfig;
use session::client::{DEFAULT_QUEUE_CAPACITY, DEFAULT_RESOLVE_TIMEOUT};
use session::replay::ReplayConfig;

use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string. sqlite for development, postgres in
    /// production.
    pub database_url: String,

    /// Address the client websocket server binds to.
    pub listen_addr: String,

    // =========================
    // Upstream market data
    // =========================
    /// Base URL of the historical REST API.
    pub provider_url: String,

    /// Key sent with every REST call and as the feed auth token.
    pub provider_api_key: String,

    /// Live trade/quote websocket feed.
    pub feed_url: String,

    // =========================
    // Aggregation
    // =========================
    /// Size of the initialization worker pool.
    pub init_workers: usize,

    /// Bars kept per (security, timeframe).
    pub buffer_capacity: usize,

    /// Timeframes aggregated for every security.
    pub timeframes: Vec<Timeframe>,

    /// Upper bound on any single historical fetch.
    pub fetch_timeout: Duration,

    /// Rebuild every aggregate shortly before the regular open on weekdays.
    pub reinit_at_open: bool,

    // =========================
    // Bursts
    // =========================
    pub burst_sweep_interval: Duration,
    pub burst_cooldown_ms: i64,

    // =========================
    // Clients
    // =========================
    /// Outbound frames buffered per client before it is treated as a slow
    /// consumer and disconnected.
    pub client_queue_capacity: usize,

    /// Upper bound on resolving the first value of a channel.
    pub resolve_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Missing keys fall back to
    /// their defaults; present but unparsable values are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let cfg = Self {
            database_url: string("DATABASE_URL", "sqlite://tape_dev.db?mode=rwc"),
            listen_addr: string("LISTEN_ADDR", "0.0.0.0:9001"),

            provider_url: string("PROVIDER_URL", "https://api.polygon.io"),
            provider_api_key: string("PROVIDER_API_KEY", ""),
            feed_url: string("FEED_URL", "wss://socket.polygon.io/stocks"),

            init_workers: parse(&lookup, "INIT_WORKERS", DEFAULT_WORKERS)?,
            buffer_capacity: parse(&lookup, "BUFFER_CAPACITY", market::buffer::DEFAULT_CAPACITY)?,
            timeframes: match lookup("AGG_TIMEFRAMES") {
                Some(raw) => parse_timeframes(&raw)?,
                None => Timeframe::ALL.to_vec(),
            },
            fetch_timeout: Duration::from_millis(parse(&lookup, "FETCH_TIMEOUT_MS", 5_000)?),
            reinit_at_open: parse(&lookup, "REINIT_AT_OPEN", true)?,

            burst_sweep_interval: Duration::from_millis(parse(&lookup, "BURST_SWEEP_MS", 1_000)?),
            burst_cooldown_ms: parse(&lookup, "BURST_COOLDOWN_MS", DEFAULT_COOLDOWN_MS)?,

            client_queue_capacity: parse(&lookup, "CLIENT_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            resolve_timeout: Duration::from_millis(parse(
                &lookup,
                "RESOLVE_TIMEOUT_MS",
                DEFAULT_RESOLVE_TIMEOUT.as_millis() as u64,
            )?),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let positive = [
            ("INIT_WORKERS", self.init_workers),
            ("BUFFER_CAPACITY", self.buffer_capacity),
            ("CLIENT_QUEUE_CAPACITY", self.client_queue_capacity),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(AppError::Config {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.timeframes.is_empty() {
            return Err(AppError::Config {
                key: "AGG_TIMEFRAMES",
                reason: "at least one timeframe is required".into(),
            });
        }
        if self.burst_sweep_interval.is_zero() {
            return Err(AppError::Config {
                key: "BURST_SWEEP_MS",
                reason: "must be greater than zero".into(),
            });
        }
        if self.burst_cooldown_ms < 0 {
            return Err(AppError::Config {
                key: "BURST_COOLDOWN_MS",
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }

    pub fn init_config(&self) -> InitConfig {
        InitConfig {
            workers: self.init_workers,
            capacity: self.buffer_capacity,
            timeframes: self.timeframes.clone(),
            fetch_timeout: self.fetch_timeout,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            queue_capacity: self.client_queue_capacity,
            resolve_timeout: self.resolve_timeout,
            replay: ReplayConfig {
                fetch_timeout: self.fetch_timeout,
                resolve_timeout: self.resolve_timeout,
                ..ReplayConfig::default()
            },
        }
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| AppError::Config {
            key,
            reason: format!("{raw:?}: {e}"),
        }),
    }
}

/// Comma separated timeframe names, e.g. `minute,minute_extended,day`.
fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>, AppError> {
    let mut out = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let tf = name.parse::<Timeframe>().map_err(|reason| AppError::Config {
            key: "AGG_TIMEFRAMES",
            reason,
        })?;
        if !out.contains(&tf) {
            out.push(tf);
        }
    }
    Ok(out)
}
