//! ReplayEngine
//!
//! Per-client historical playback. A simulated clock advances at `speed`
//! times wall time (or stands still while paused); a playback task wakes
//! every `tick`, emits every buffered event whose timestamp the clock has
//! passed and schedules background refills so each channel's buffer keeps
//! `lookahead_ms` of data ahead of the clock.
//!
//! Re-seeding bumps each channel's epoch, so a refill that was in flight for
//! the old position is discarded when it lands.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::channel::{ChannelName, SecurityChannel, StreamType};
use crate::error::SessionError;
use crate::hub::ClientHandle;
use crate::initial::InitialValueResolver;
use crate::protocol::{Frame, data_frame};

pub const SLOW_INTERVAL_MS: i64 = 1_000;

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub tick: Duration,
    pub lookahead_ms: i64,
    pub fetch_span_ms: i64,
    pub fetch_timeout: Duration,
    pub resolve_timeout: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            lookahead_ms: 60_000,
            fetch_span_ms: 300_000,
            fetch_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEvent {
    pub ts_ms: i64,
    pub data: Value,
}

/// Historical events for one channel.
#[async_trait]
pub trait ReplaySource: Send + Sync {
    /// Events in `[from_ms, to_ms)`, oldest first.
    async fn fetch(
        &self,
        channel: &SecurityChannel,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<ReplayEvent>>;
}

#[derive(Debug)]
struct ReplayClock {
    sim_anchor_ms: i64,
    wall_anchor: Instant,
    speed: f64,
    paused: bool,
}

impl ReplayClock {
    fn new(start_ms: i64) -> Self {
        Self {
            sim_anchor_ms: start_ms,
            wall_anchor: Instant::now(),
            speed: 1.0,
            paused: false,
        }
    }

    fn now_ms(&self) -> i64 {
        if self.paused {
            return self.sim_anchor_ms;
        }
        let elapsed = self.wall_anchor.elapsed().as_secs_f64() * 1_000.0 * self.speed;
        self.sim_anchor_ms + elapsed as i64
    }

    /// Folds elapsed time into the anchor so speed/pause changes apply from now on.
    fn rebase(&mut self) {
        self.sim_anchor_ms = self.now_ms();
        self.wall_anchor = Instant::now();
    }

    fn seed(&mut self, ts_ms: i64) {
        self.sim_anchor_ms = ts_ms;
        self.wall_anchor = Instant::now();
    }

    fn pause(&mut self) {
        self.rebase();
        self.paused = true;
    }

    fn play(&mut self) {
        self.wall_anchor = Instant::now();
        self.paused = false;
    }

    fn set_speed(&mut self, speed: f64) {
        self.rebase();
        self.speed = speed;
    }
}

#[derive(Debug)]
struct ReplayData {
    buffer: VecDeque<ReplayEvent>,
    refilling: bool,
    cursor_ms: i64,
    last_emitted_ms: Option<i64>,
    needs_initial: bool,
    epoch: u64,
}

impl ReplayData {
    fn seeded(at_ms: i64, epoch: u64) -> Self {
        Self {
            buffer: VecDeque::new(),
            refilling: false,
            cursor_ms: at_ms,
            last_emitted_ms: None,
            needs_initial: true,
            epoch,
        }
    }
}

struct Shared {
    clock: Mutex<ReplayClock>,
    channels: Mutex<HashMap<SecurityChannel, ReplayData>>,
    epochs: AtomicU64,
}

impl Shared {
    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct Collaborators {
    handle: ClientHandle,
    source: Arc<dyn ReplaySource>,
    resolver: Arc<dyn InitialValueResolver>,
    config: ReplayConfig,
}

#[derive(Debug)]
struct RefillJob {
    channel: SecurityChannel,
    epoch: u64,
    from_ms: i64,
    to_ms: i64,
    with_initial: bool,
}

pub struct ReplayEngine {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl ReplayEngine {
    /// Seeds every channel at `start_ms` and starts playback at speed 1.
    pub fn start(
        start_ms: i64,
        channels: impl IntoIterator<Item = SecurityChannel>,
        handle: ClientHandle,
        source: Arc<dyn ReplaySource>,
        resolver: Arc<dyn InitialValueResolver>,
        config: ReplayConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            clock: Mutex::new(ReplayClock::new(start_ms)),
            channels: Mutex::new(HashMap::new()),
            epochs: AtomicU64::new(0),
        });

        {
            let mut map = shared.channels.lock();
            for channel in channels {
                map.insert(channel, ReplayData::seeded(start_ms, shared.next_epoch()));
            }
        }

        let collab = Collaborators {
            handle,
            source,
            resolver,
            config,
        };
        let task = tokio::spawn(playback(Arc::clone(&shared), collab));

        Self {
            shared,
            task: Some(task),
        }
    }

    pub fn sim_now(&self) -> i64 {
        self.shared.clock.lock().now_ms()
    }

    /// Moves the clock to `ts_ms` and drops every buffered event.
    pub fn reseed(&self, ts_ms: i64) {
        self.shared.clock.lock().seed(ts_ms);
        let mut map = self.shared.channels.lock();
        for data in map.values_mut() {
            *data = ReplayData::seeded(ts_ms, self.shared.next_epoch());
        }
        debug!(ts_ms, channels = map.len(), "replay re-seeded");
    }

    pub fn add_channel(&self, channel: SecurityChannel) -> bool {
        let at = self.sim_now();
        let mut map = self.shared.channels.lock();
        if map.contains_key(&channel) {
            return false;
        }
        map.insert(channel, ReplayData::seeded(at, self.shared.next_epoch()));
        true
    }

    pub fn remove_channel(&self, channel: &SecurityChannel) -> bool {
        self.shared.channels.lock().remove(channel).is_some()
    }

    pub fn channels(&self) -> Vec<SecurityChannel> {
        self.shared.channels.lock().keys().copied().collect()
    }

    pub fn pause(&self) {
        self.shared.clock.lock().pause();
    }

    pub fn play(&self) {
        self.shared.clock.lock().play();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.clock.lock().paused
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), SessionError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(SessionError::InvalidSpeed(speed));
        }
        self.shared.clock.lock().set_speed(speed);
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        self.shared.clock.lock().speed
    }

    /// Stops playback, cancels in-flight refills and discards all replay
    /// buffers. Returns the channels that were being replayed.
    pub fn stop(&mut self) -> Vec<SecurityChannel> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared
            .channels
            .lock()
            .drain()
            .map(|(channel, _)| channel)
            .collect()
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Refills run in a set owned by this task, so aborting playback aborts
/// them too and no outbound sender outlives the engine.
async fn playback(shared: Arc<Shared>, collab: Collaborators) {
    let mut ticker = tokio::time::interval(collab.config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refills = JoinSet::new();

    loop {
        ticker.tick().await;
        while refills.try_join_next().is_some() {}

        let now = shared.clock.lock().now_ms();
        let (due, jobs) = collect_due(&shared, &collab.config, now);

        for (channel, event) in due {
            let frame: Frame = match data_frame(&ChannelName::Security(channel), &event.data) {
                Ok(f) => f,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "dropping unserializable replay event");
                    continue;
                }
            };
            match collab.handle.send(frame) {
                Ok(()) => {}
                Err(SessionError::SlowConsumer) => {
                    warn!(client_id = %collab.handle.id, "replay queue full, disconnecting");
                    collab.handle.signal_shutdown();
                    return;
                }
                Err(_) => return,
            }
        }

        for job in jobs {
            refills.spawn(refill(Arc::clone(&shared), collab.clone(), job));
        }
    }
}

fn collect_due(
    shared: &Shared,
    config: &ReplayConfig,
    now: i64,
) -> (Vec<(SecurityChannel, ReplayEvent)>, Vec<RefillJob>) {
    let mut due = Vec::new();
    let mut jobs = Vec::new();
    let mut map = shared.channels.lock();

    for (channel, data) in map.iter_mut() {
        while data.buffer.front().is_some_and(|e| e.ts_ms <= now) {
            let Some(event) = data.buffer.pop_front() else { break };

            if channel.stream == StreamType::Slow
                && data
                    .last_emitted_ms
                    .is_some_and(|last| event.ts_ms - last < SLOW_INTERVAL_MS)
            {
                continue;
            }
            data.last_emitted_ms = Some(event.ts_ms);
            due.push((*channel, event));
        }

        if !data.refilling && data.cursor_ms < now + config.lookahead_ms {
            data.refilling = true;
            jobs.push(RefillJob {
                channel: *channel,
                epoch: data.epoch,
                from_ms: data.cursor_ms,
                to_ms: data.cursor_ms + config.fetch_span_ms,
                with_initial: std::mem::take(&mut data.needs_initial),
            });
        }
    }

    due.sort_by_key(|(_, e)| e.ts_ms);
    (due, jobs)
}

async fn refill(shared: Arc<Shared>, collab: Collaborators, job: RefillJob) {
    let channel = job.channel;
    let mut events = Vec::new();

    if job.with_initial {
        let resolved = tokio::time::timeout(
            collab.config.resolve_timeout,
            collab.resolver.resolve(&channel, job.from_ms),
        )
        .await;
        match resolved {
            Ok(Ok(Some(data))) => events.push(ReplayEvent {
                ts_ms: job.from_ms,
                data,
            }),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(channel = %channel, error = %e, "replay initial value failed"),
            Err(_) => warn!(channel = %channel, "replay initial value timed out"),
        }
    }

    let fetched = tokio::time::timeout(
        collab.config.fetch_timeout,
        collab.source.fetch(&channel, job.from_ms, job.to_ms),
    )
    .await;
    match fetched {
        Ok(Ok(batch)) => events.extend(
            batch
                .into_iter()
                .filter(|e| e.ts_ms >= job.from_ms && e.ts_ms < job.to_ms && channel.accepts(e.ts_ms)),
        ),
        // The span is skipped; playback continues from the next one.
        Ok(Err(e)) => warn!(channel = %channel, error = %e, from_ms = job.from_ms, "replay fetch failed"),
        Err(_) => warn!(channel = %channel, from_ms = job.from_ms, "replay fetch timed out"),
    }

    events.sort_by_key(|e| e.ts_ms);

    let mut map = shared.channels.lock();
    let Some(data) = map.get_mut(&channel) else {
        return;
    };
    if data.epoch != job.epoch {
        debug!(channel = %channel, "discarding stale replay refill");
        return;
    }
    data.buffer.extend(events);
    data.cursor_ms = job.to_ms;
    data.refilling = false;
}
