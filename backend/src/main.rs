use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use backend::{
    config::AppConfig,
    db::Db,
    error::AppError,
    feed::{FeedClient, FeedRouter, LastTrades},
    jobs,
    lookup::ProviderLookup,
    provider::RestMarketDataClient,
    securities::SqlxSecurityRepository,
    server::{ServerContext, serve},
};
use common::logger::init_tracing;
use common::time::now_ms;
use market::burst::BurstDetector;
use market::init::AggregateInitializer;
use market::provider::MarketDataProvider;
use market::roster::SecurityRepository;
use market::store::AggregateStore;
use session::SubscriptionHub;

const FEED_QUEUE_CAPACITY: usize = 10_000;

/// Connects the DB and makes sure the roster table exists.
async fn init_db(cfg: &AppConfig) -> anyhow::Result<Db> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await.context("running migrations")?;
    Ok(db)
}

/// First build of the aggregate store. Runs in the background so clients can
/// connect while it backfills; ingestion is skipped until it lands.
fn start_initialization(initializer: Arc<AggregateInitializer>) {
    tokio::spawn(async move {
        match initializer.run(now_ms()).await {
            Ok(summary) => tracing::info!(
                securities = summary.securities,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "aggregate store initialized"
            ),
            Err(e) => tracing::error!(error = %e, "initial aggregate build failed"),
        }
    });
}

/// Starts the upstream feed worker and the router consuming its events.
fn start_feed(cfg: &AppConfig, router: FeedRouter) {
    let (tx, rx) = mpsc::channel(FEED_QUEUE_CAPACITY);
    let client = FeedClient::new(cfg.feed_url.clone(), cfg.provider_api_key.clone());

    tokio::spawn(router.run(rx));
    tokio::spawn(async move {
        if let Err(e) = client.run(tx).await {
            tracing::error!(error = ?e, "live feed worker stopped");
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing("tape-backend", is_production);

    tracing::info!("Starting tape backend...");

    let cfg = AppConfig::from_env()?;
    let db = init_db(&cfg).await?;

    let roster: Arc<dyn SecurityRepository> =
        Arc::new(SqlxSecurityRepository::new(db.pool.as_ref().clone()));
    let provider: Arc<dyn MarketDataProvider> = Arc::new(RestMarketDataClient::new(
        cfg.provider_url.clone(),
        cfg.provider_api_key.clone(),
    )?);

    let store = Arc::new(AggregateStore::new());
    let hub = SubscriptionHub::new();
    let last_trades = Arc::new(LastTrades::new());

    let initializer = Arc::new(AggregateInitializer::new(
        Arc::clone(&store),
        Arc::clone(&roster),
        Arc::clone(&provider),
        cfg.init_config(),
    ));
    start_initialization(Arc::clone(&initializer));
    if cfg.reinit_at_open {
        jobs::spawn_daily_reinit(initializer);
    }

    start_feed(
        &cfg,
        FeedRouter::new(Arc::clone(&store), hub.clone(), Arc::clone(&last_trades)),
    );

    jobs::spawn_burst_sweep(
        BurstDetector::new(Arc::clone(&store), cfg.burst_cooldown_ms),
        hub.clone(),
        cfg.burst_sweep_interval,
    );
    jobs::spawn_close_publisher(hub.clone(), last_trades);

    let lookup = Arc::new(ProviderLookup::new(roster, provider));
    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: cfg.listen_addr.clone(),
            source,
        })?;
    let ctx = ServerContext {
        hub,
        resolver: lookup.clone(),
        source: lookup,
        client_config: cfg.client_config(),
    };
    tokio::spawn(async move {
        if let Err(e) = serve(listener, ctx).await {
            tracing::error!(error = ?e, "client server stopped");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}
