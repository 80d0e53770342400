//! Background loops: daily re-initialization before the open, the burst
//! sweep and the session close publisher.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info};
use uuid::Uuid;

use common::logger::{TraceId, root_span};
use common::time::{AFTER_HOURS_CLOSE_SECS, REGULAR_CLOSE_SECS, next_trading_time, now_ms};
use market::burst::BurstDetector;
use market::init::AggregateInitializer;
use session::payload::ClosePayload;
use session::{ChannelName, HoursMode, SecurityChannel, StreamType, SubscriptionHub};

use crate::feed::LastTrades;

/// 09:25 exchange time.
pub const REINIT_SECS: u32 = 9 * 3600 + 25 * 60;

const REGULAR_CLOSE_HOURS: [Option<HoursMode>; 2] = [None, Some(HoursMode::Regular)];
const EXTENDED_CLOSE_HOURS: [Option<HoursMode>; 1] = [Some(HoursMode::Extended)];

fn until(target_ms: i64, now_ms: i64) -> Duration {
    Duration::from_millis((target_ms - now_ms).max(0) as u64)
}

/// Rebuilds every aggregate shortly before each weekday open. A failed run
/// keeps the previous store and waits for the next day.
pub fn spawn_daily_reinit(initializer: Arc<AggregateInitializer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = now_ms();
            let next = next_trading_time(now, REINIT_SECS);
            info!(next_ms = next, "next aggregate re-initialization scheduled");
            tokio::time::sleep(until(next, now)).await;

            match initializer.run(now_ms()).await {
                Ok(summary) => info!(
                    securities = summary.securities,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "daily re-initialization complete"
                ),
                Err(e) => error!(error = %e, "daily re-initialization failed"),
            }
        }
    })
}

/// Evaluates every security on a fixed cadence and publishes alerts to
/// `tape-bursts`.
pub fn spawn_burst_sweep(
    detector: BurstDetector,
    hub: SubscriptionHub,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            publish_bursts(&detector, &hub, now_ms());
        }
    })
}

pub fn publish_bursts(detector: &BurstDetector, hub: &SubscriptionHub, now_ms: i64) -> usize {
    let bursts = detector.sweep(now_ms);
    for burst in &bursts {
        let stats = hub.publish(&ChannelName::TapeBursts, burst);
        debug!(
            security_id = burst.security_id,
            delivered = stats.delivered,
            "tape burst published"
        );
    }
    bursts.len()
}

/// Publishes closing prices at 16:00 (regular) and 20:00 (extended) on
/// weekdays.
pub fn spawn_close_publisher(hub: SubscriptionHub, last_trades: Arc<LastTrades>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = now_ms();
            let regular = next_trading_time(now, REGULAR_CLOSE_SECS);
            let extended = next_trading_time(now, AFTER_HOURS_CLOSE_SECS);
            let (close_ms, is_extended) = if regular <= extended {
                (regular, false)
            } else {
                (extended, true)
            };

            tokio::time::sleep(until(close_ms, now)).await;

            let span = root_span("session_close", &TraceId::new(Uuid::new_v4().to_string()));
            async {
                let published = publish_closes(&hub, &last_trades, close_ms, is_extended);
                info!(close_ms, extended = is_extended, published, "session close published");
            }
            .instrument(span)
            .await;
        }
    })
}

/// Sends the last trade of the session to each security's close channels.
/// Regular closes feed `{id}-close` and `{id}-close-regular`, extended closes
/// feed `{id}-close-extended`.
pub fn publish_closes(
    hub: &SubscriptionHub,
    last_trades: &LastTrades,
    close_ms: i64,
    extended: bool,
) -> usize {
    let hours: &[Option<HoursMode>] = if extended {
        &EXTENDED_CLOSE_HOURS
    } else {
        &REGULAR_CLOSE_HOURS
    };

    let mut published = 0;
    for (security_id, trade) in last_trades.closing(extended) {
        if trade.ts_ms > close_ms {
            continue;
        }
        let payload = ClosePayload {
            price: trade.price,
            timestamp: close_ms,
        };
        for h in hours {
            let channel = SecurityChannel::new(security_id, StreamType::Close, *h);
            published += hub.publish(&channel.into(), &payload).delivered;
        }
    }
    published
}
