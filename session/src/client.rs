//! Client
//!
//! One connection's state machine. In `Live` mode subscriptions are hub
//! memberships; in `Replay` mode per-security channels are served by the
//! client's own [`ReplayEngine`] and only global channels stay on the hub.
//!
//! Messages in flight while switching between the two modes may be lost.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::time::{next_session_open, now_ms};

use crate::channel::{ChannelName, SecurityChannel};
use crate::error::SessionError;
use crate::hub::{ClientHandle, ClientId, SubscriptionHub};
use crate::initial::InitialValueResolver;
use crate::protocol::{ControlMessage, Frame, data_frame, error_frame};
use crate::replay::{ReplayConfig, ReplayEngine, ReplaySource};

pub const DEFAULT_QUEUE_CAPACITY: usize = 3_000;
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub queue_capacity: usize,
    pub resolve_timeout: Duration,
    pub replay: ReplayConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            replay: ReplayConfig::default(),
        }
    }
}

/// Transport side of a client: the writer drains `outbound`, the reader
/// stops when `shutdown` fires.
pub struct ClientIo {
    pub outbound: mpsc::Receiver<Frame>,
    pub shutdown: Arc<Notify>,
}

enum Mode {
    Live,
    Replay(ReplayEngine),
}

pub struct Client {
    id: ClientId,
    user_id: Option<String>,
    hub: SubscriptionHub,
    handle: Option<ClientHandle>,
    shutdown: Arc<Notify>,
    resolver: Arc<dyn InitialValueResolver>,
    source: Arc<dyn ReplaySource>,
    config: ClientConfig,
    mode: Mode,
    extended: bool,
    closed: bool,
}

impl Client {
    pub fn new(
        hub: SubscriptionHub,
        user_id: Option<String>,
        resolver: Arc<dyn InitialValueResolver>,
        source: Arc<dyn ReplaySource>,
        config: ClientConfig,
    ) -> (Self, ClientIo) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = Arc::new(Notify::new());
        let handle = ClientHandle::new(id, tx, Arc::clone(&shutdown));

        if let Some(user) = &user_id {
            if let Some(previous) = hub.register_user(user, id) {
                info!(user_id = %user, client_id = %id, previous = %previous, "user reconnected");
            }
        }

        let client = Self {
            id,
            user_id,
            hub,
            handle: Some(handle),
            shutdown: Arc::clone(&shutdown),
            resolver,
            source,
            config,
            mode: Mode::Live,
            extended: false,
            closed: false,
        };
        let io = ClientIo {
            outbound: rx,
            shutdown,
        };
        (client, io)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_replay(&self) -> bool {
        matches!(self.mode, Mode::Replay(_))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    /// Simulated time while replaying.
    pub fn replay_time(&self) -> Option<i64> {
        match &self.mode {
            Mode::Replay(engine) => Some(engine.sim_now()),
            Mode::Live => None,
        }
    }

    /// Channels this client is subscribed to in either mode.
    pub fn subscriptions(&self) -> Vec<ChannelName> {
        let mut out = self.hub.channels_of(&self.id);
        if let Mode::Replay(engine) = &self.mode {
            out.extend(engine.channels().into_iter().map(ChannelName::Security));
        }
        out
    }

    fn handle(&self) -> Result<&ClientHandle, SessionError> {
        self.handle.as_ref().ok_or(SessionError::Closed)
    }

    fn engine(&self) -> Result<&ReplayEngine, SessionError> {
        match &self.mode {
            Mode::Replay(engine) => Ok(engine),
            Mode::Live => {
                warn!(client_id = %self.id, "replay control ignored in live mode");
                Err(SessionError::NotInReplay)
            }
        }
    }

    /// Parses and applies one text frame. Malformed input is logged and dropped.
    pub async fn handle_text(&mut self, text: &str) {
        let msg = match ControlMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "ignoring malformed control message");
                return;
            }
        };
        if let Err(e) = self.handle_control(msg).await {
            debug!(client_id = %self.id, error = %e, "control message rejected");
        }
    }

    pub async fn handle_control(&mut self, msg: ControlMessage) -> Result<(), SessionError> {
        match msg {
            ControlMessage::Subscribe { channel_name } => self.subscribe(&channel_name).await,
            ControlMessage::Unsubscribe { channel_name } => self.unsubscribe(&channel_name),
            ControlMessage::Replay { timestamp } => self.enter_replay(timestamp),
            ControlMessage::Pause => self.pause(),
            ControlMessage::Play => self.play(),
            ControlMessage::Speed { speed } => self.set_speed(speed),
            ControlMessage::Realtime => self.exit_replay().await,
            ControlMessage::NextOpen => self.next_open(),
            ControlMessage::SetExtended { extended_hours } => {
                self.set_extended(extended_hours);
                Ok(())
            }
        }
    }

    pub async fn subscribe(&mut self, name: &str) -> Result<(), SessionError> {
        let handle = self.handle()?.clone();

        let channel = match name.parse::<ChannelName>() {
            Ok(c) => c,
            Err(e) => {
                warn!(client_id = %self.id, channel = name, "rejected subscription");
                // Best effort: the client may already be saturated.
                let _ = handle.send(error_frame(name, &e.to_string()));
                return Err(e);
            }
        };

        let security = match channel {
            ChannelName::TapeBursts => {
                self.hub.subscribe(channel, handle);
                return Ok(());
            }
            ChannelName::Security(sc) => sc,
        };

        if let Mode::Replay(engine) = &self.mode {
            engine.add_channel(security);
            return Ok(());
        }
        self.subscribe_live(security).await
    }

    /// Sends the initial value, then joins the hub, so the initial value is
    /// always ahead of every live update in the queue.
    async fn subscribe_live(&self, security: SecurityChannel) -> Result<(), SessionError> {
        let handle = self.handle()?.clone();
        let channel = ChannelName::Security(security);
        if self.hub.is_member(&channel, &self.id) {
            return Ok(());
        }

        if let Some(value) = self.resolve_initial(&security, now_ms()).await {
            match data_frame(&channel, &value) {
                Ok(frame) => {
                    if let Err(e) = handle.send(frame) {
                        if e == SessionError::SlowConsumer {
                            handle.signal_shutdown();
                        }
                        return Err(e);
                    }
                }
                Err(e) => warn!(channel = %channel, error = %e, "initial value not serializable"),
            }
        }

        self.hub.subscribe(channel, handle);
        debug!(client_id = %self.id, channel = %channel, "subscribed");
        Ok(())
    }

    async fn resolve_initial(&self, channel: &SecurityChannel, at_ms: i64) -> Option<Value> {
        let resolved =
            tokio::time::timeout(self.config.resolve_timeout, self.resolver.resolve(channel, at_ms))
                .await;
        match resolved {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(channel = %channel, error = %e, "initial value lookup failed");
                None
            }
            Err(_) => {
                warn!(channel = %channel, "initial value lookup timed out");
                None
            }
        }
    }

    pub fn unsubscribe(&mut self, name: &str) -> Result<(), SessionError> {
        let channel: ChannelName = name.parse()?;
        match (&self.mode, channel) {
            (Mode::Replay(engine), ChannelName::Security(sc)) => {
                engine.remove_channel(&sc);
            }
            _ => {
                self.hub.unsubscribe(&channel, &self.id);
            }
        }
        Ok(())
    }

    /// Moves every live per-security subscription into replay seeded at
    /// `ts_ms`. Already replaying: only re-seeds the clock and buffers.
    pub fn enter_replay(&mut self, ts_ms: i64) -> Result<(), SessionError> {
        let handle = self.handle()?.clone();

        if let Mode::Replay(engine) = &self.mode {
            engine.reseed(ts_ms);
            return Ok(());
        }

        let channels = self.hub.detach_security_channels(&self.id);
        info!(client_id = %self.id, ts_ms, channels = channels.len(), "entering replay");

        let engine = ReplayEngine::start(
            ts_ms,
            channels,
            handle,
            Arc::clone(&self.source),
            Arc::clone(&self.resolver),
            self.config.replay.clone(),
        );
        self.mode = Mode::Replay(engine);
        Ok(())
    }

    /// Stops playback and re-subscribes every replayed channel live.
    pub async fn exit_replay(&mut self) -> Result<(), SessionError> {
        let mut engine = match std::mem::replace(&mut self.mode, Mode::Live) {
            Mode::Replay(engine) => engine,
            Mode::Live => {
                warn!(client_id = %self.id, "realtime requested while already live");
                return Err(SessionError::NotInReplay);
            }
        };

        let channels = engine.stop();
        drop(engine);
        info!(client_id = %self.id, channels = channels.len(), "leaving replay");

        for channel in channels {
            self.subscribe_live(channel).await?;
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.engine()?.pause();
        Ok(())
    }

    pub fn play(&self) -> Result<(), SessionError> {
        self.engine()?.play();
        Ok(())
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), SessionError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(SessionError::InvalidSpeed(speed));
        }
        self.engine()?.set_speed(speed)
    }

    pub fn set_extended(&mut self, extended: bool) {
        self.extended = extended;
    }

    /// Jumps replay to the next weekday session open (04:00 when extended,
    /// 09:30 otherwise).
    pub fn next_open(&self) -> Result<(), SessionError> {
        let engine = self.engine()?;
        let target = next_session_open(engine.sim_now(), self.extended);
        engine.reseed(target);
        Ok(())
    }

    /// Releases everything the client holds. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Mode::Replay(mut engine) = std::mem::replace(&mut self.mode, Mode::Live) {
            engine.stop();
        }
        self.hub.remove_client(&self.id);
        self.handle.take();
        if let Some(user) = &self.user_id {
            self.hub.unregister_user(user, &self.id);
        }
        self.shutdown.notify_one();

        info!(client_id = %self.id, "client closed");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
