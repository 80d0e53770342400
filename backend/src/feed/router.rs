use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use common::time::{is_extended_hours, is_regular_hours};
use market::ingest::TickIngestor;
use market::store::AggregateStore;
use market::{MarketError, SecurityId, Trade};
use session::payload::{QuotePayload, TickPayload, TradePayload};
use session::replay::SLOW_INTERVAL_MS;
use session::{ChannelName, HoursMode, SecurityChannel, StreamType, SubscriptionHub};

use crate::feed::events::{FeedEvent, QuoteEvent, TradeEvent};

const HOURS_VARIANTS: [Option<HoursMode>; 3] =
    [None, Some(HoursMode::Regular), Some(HoursMode::Extended)];

#[derive(Debug, Default, Clone, Copy)]
struct SessionTrades {
    regular: Option<Trade>,
    extended: Option<Trade>,
}

/// Latest trade per security inside regular and extended hours, read by the
/// session close publisher.
#[derive(Debug, Default)]
pub struct LastTrades {
    inner: RwLock<HashMap<SecurityId, SessionTrades>>,
}

impl LastTrades {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, security_id: SecurityId, trade: &Trade) {
        if !is_extended_hours(trade.ts_ms) {
            return;
        }
        let newer = |prev: &Option<Trade>| prev.is_none_or(|p| p.ts_ms <= trade.ts_ms);

        let mut guard = self.inner.write();
        let entry = guard.entry(security_id).or_default();
        if is_regular_hours(trade.ts_ms) && newer(&entry.regular) {
            entry.regular = Some(*trade);
        }
        if newer(&entry.extended) {
            entry.extended = Some(*trade);
        }
    }

    /// Last trade of each security for the regular or extended session,
    /// ordered by id.
    pub fn closing(&self, extended: bool) -> Vec<(SecurityId, Trade)> {
        let guard = self.inner.read();
        let mut out: Vec<(SecurityId, Trade)> = guard
            .iter()
            .filter_map(|(id, s)| {
                let trade = if extended { s.extended } else { s.regular };
                trade.map(|t| (*id, t))
            })
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

/// Applies live feed events: trades go into the aggregates and out to the
/// trade channels, quotes out to the quote channels.
pub struct FeedRouter {
    store: Arc<AggregateStore>,
    ingestor: TickIngestor,
    hub: SubscriptionHub,
    last_trades: Arc<LastTrades>,
    last_slow: HashMap<SecurityChannel, i64>,
}

impl FeedRouter {
    pub fn new(store: Arc<AggregateStore>, hub: SubscriptionHub, last_trades: Arc<LastTrades>) -> Self {
        Self {
            ingestor: TickIngestor::new(Arc::clone(&store)),
            store,
            hub,
            last_trades,
            last_slow: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<FeedEvent>) {
        info!("feed router started");
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        warn!("feed channel closed, router stopping");
    }

    pub fn handle(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Trade(t) => self.on_trade(&t),
            FeedEvent::Quote(q) => self.on_quote(&q),
            FeedEvent::MinuteAggregate(a) => {
                trace!(symbol = %a.symbol, start_ms = a.start_ms, "minute aggregate");
            }
            FeedEvent::Status(s) => {
                info!(status = %s.status, message = %s.message, "feed status");
            }
        }
    }

    fn on_trade(&mut self, ev: &TradeEvent) {
        let Some(security_id) = self.store.lookup_ticker(&ev.symbol) else {
            trace!(symbol = %ev.symbol, "trade for unknown symbol");
            return;
        };
        let trade = ev.trade();

        match self.ingestor.ingest_trade(security_id, &trade) {
            Ok(_) => {}
            Err(MarketError::NotReady) => trace!(security_id, "store not ready, trade not aggregated"),
            Err(e) => debug!(security_id, error = %e, "trade not aggregated"),
        }
        self.last_trades.record(security_id, &trade);

        let payload = TradePayload::from(&trade);
        for hours in HOURS_VARIANTS {
            let fast = SecurityChannel::new(security_id, StreamType::Fast, hours);
            if fast.accepts(trade.ts_ms) {
                self.hub.publish(&fast.into(), &payload);
            }

            let slow = SecurityChannel::new(security_id, StreamType::Slow, hours);
            if slow.accepts(trade.ts_ms) && self.slow_due(slow, trade.ts_ms) {
                self.hub.publish(&slow.into(), &payload);
            }
        }

        let all = SecurityChannel::new(security_id, StreamType::All, None);
        self.hub.publish(&all.into(), &TickPayload::Trade(payload));
    }

    fn on_quote(&mut self, ev: &QuoteEvent) {
        let Some(security_id) = self.store.lookup_ticker(&ev.symbol) else {
            trace!(symbol = %ev.symbol, "quote for unknown symbol");
            return;
        };
        let payload = QuotePayload::from(&ev.quote());

        for hours in HOURS_VARIANTS {
            let channel = SecurityChannel::new(security_id, StreamType::Quote, hours);
            if channel.accepts(ev.ts_ms) {
                self.hub.publish(&channel.into(), &payload);
            }
        }

        let all = SecurityChannel::new(security_id, StreamType::All, None);
        self.hub.publish(&all.into(), &TickPayload::Quote(payload));
    }

    /// Slow channels carry at most one trade per second.
    fn slow_due(&mut self, channel: SecurityChannel, ts_ms: i64) -> bool {
        if !self.hub.has_subscribers(&ChannelName::Security(channel)) {
            self.last_slow.remove(&channel);
            return false;
        }
        match self.last_slow.get(&channel) {
            Some(prev) if ts_ms - prev < SLOW_INTERVAL_MS => false,
            _ => {
                self.last_slow.insert(channel, ts_ms);
                true
            }
        }
    }
}
