//! SubscriptionHub
//!
//! Channel to member-set map and the only live broadcast path. All
//! membership lives behind one coarse mutex; publishing never blocks:
//! every member gets a `try_send`, and a member whose queue is full is
//! evicted from every channel and told to shut down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channel::{ChannelName, SecurityChannel};
use crate::error::SessionError;
use crate::protocol::{Frame, data_frame};

pub type ClientId = Uuid;

/// What the hub holds for one connection: its outbound queue and the signal
/// that tells its transport to stop.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    outbound: mpsc::Sender<Frame>,
    shutdown: Arc<Notify>,
}

impl ClientHandle {
    pub fn new(id: ClientId, outbound: mpsc::Sender<Frame>, shutdown: Arc<Notify>) -> Self {
        Self {
            id,
            outbound,
            shutdown,
        }
    }

    /// Non-blocking enqueue.
    pub fn send(&self, frame: Frame) -> Result<(), SessionError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::SlowConsumer,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<ChannelName, HashMap<ClientId, ClientHandle>>,
    memberships: HashMap<ClientId, HashSet<ChannelName>>,
    users: HashMap<String, ClientId>,
}

impl HubState {
    fn remove_member(&mut self, channel: &ChannelName, client_id: &ClientId) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(members) => {
                let removed = members.remove(client_id).is_some();
                if members.is_empty() {
                    self.channels.remove(channel);
                }
                removed
            }
            None => false,
        };

        if let Some(set) = self.memberships.get_mut(client_id) {
            set.remove(channel);
            if set.is_empty() {
                self.memberships.remove(client_id);
            }
        }
        removed
    }

    fn remove_client(&mut self, client_id: &ClientId) -> Vec<ChannelName> {
        let channels: Vec<ChannelName> = self
            .memberships
            .remove(client_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for channel in &channels {
            if let Some(members) = self.channels.get_mut(channel) {
                members.remove(client_id);
                if members.is_empty() {
                    self.channels.remove(channel);
                }
            }
        }
        channels
    }
}

#[derive(Clone, Default)]
pub struct SubscriptionHub {
    inner: Arc<Mutex<HubState>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handle` to `channel`. Returns `false` if it was already a member.
    pub fn subscribe(&self, channel: ChannelName, handle: ClientHandle) -> bool {
        let mut state = self.inner.lock();
        let id = handle.id;
        let inserted = state
            .channels
            .entry(channel)
            .or_default()
            .insert(id, handle)
            .is_none();
        state.memberships.entry(id).or_default().insert(channel);
        inserted
    }

    pub fn unsubscribe(&self, channel: &ChannelName, client_id: &ClientId) -> bool {
        self.inner.lock().remove_member(channel, client_id)
    }

    pub fn is_member(&self, channel: &ChannelName, client_id: &ClientId) -> bool {
        self.inner
            .lock()
            .channels
            .get(channel)
            .is_some_and(|m| m.contains_key(client_id))
    }

    /// Removes the client from every channel and returns what it was in.
    pub fn remove_client(&self, client_id: &ClientId) -> Vec<ChannelName> {
        self.inner.lock().remove_client(client_id)
    }

    /// Removes every per-security membership of the client in one step and
    /// returns those channels. Global channels are left alone.
    pub fn detach_security_channels(&self, client_id: &ClientId) -> Vec<SecurityChannel> {
        let mut state = self.inner.lock();
        let channels: Vec<SecurityChannel> = state
            .memberships
            .get(client_id)
            .map(|set| set.iter().filter_map(|c| c.security().copied()).collect())
            .unwrap_or_default();

        for channel in &channels {
            state.remove_member(&ChannelName::Security(*channel), client_id);
        }
        channels
    }

    pub fn channels_of(&self, client_id: &ClientId) -> Vec<ChannelName> {
        self.inner
            .lock()
            .memberships
            .get(client_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, channel: &ChannelName) -> usize {
        self.inner.lock().channels.get(channel).map_or(0, |m| m.len())
    }

    pub fn has_subscribers(&self, channel: &ChannelName) -> bool {
        self.member_count(channel) > 0
    }

    /// Number of clients with at least one subscription.
    pub fn subscribed_clients(&self) -> usize {
        self.inner.lock().memberships.len()
    }

    /// Delivers an already serialized frame to every member of `channel`.
    pub fn broadcast(&self, channel: &ChannelName, frame: &Frame) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        let mut state = self.inner.lock();

        let Some(members) = state.channels.get(channel) else {
            return stats;
        };

        let mut evict = Vec::new();
        let mut gone = Vec::new();
        for handle in members.values() {
            match handle.send(Arc::clone(frame)) {
                Ok(()) => stats.delivered += 1,
                Err(SessionError::SlowConsumer) => evict.push(handle.clone()),
                Err(_) => gone.push(handle.id),
            }
        }

        for handle in evict {
            warn!(
                client_id = %handle.id,
                channel = %channel,
                "outbound queue full, disconnecting slow consumer"
            );
            state.remove_client(&handle.id);
            handle.signal_shutdown();
            stats.evicted += 1;
        }
        for id in gone {
            debug!(client_id = %id, "dropping closed client");
            state.remove_client(&id);
        }

        stats
    }

    /// Serializes `data` once and broadcasts it. Skips serialization when
    /// nobody listens.
    pub fn publish<T: Serialize + ?Sized>(&self, channel: &ChannelName, data: &T) -> BroadcastStats {
        if !self.has_subscribers(channel) {
            return BroadcastStats::default();
        }
        match data_frame(channel, data) {
            Ok(frame) => self.broadcast(channel, &frame),
            Err(e) => {
                warn!(channel = %channel, error = %e, "failed to serialize frame");
                BroadcastStats::default()
            }
        }
    }

    /// Records `user_id` as connected on `client_id`. Returns the client the
    /// user was previously registered on, if any.
    pub fn register_user(&self, user_id: &str, client_id: ClientId) -> Option<ClientId> {
        self.inner.lock().users.insert(user_id.to_string(), client_id)
    }

    /// Drops the registry entry only if it still points at `client_id`.
    pub fn unregister_user(&self, user_id: &str, client_id: &ClientId) -> bool {
        let mut state = self.inner.lock();
        if state.users.get(user_id) == Some(client_id) {
            state.users.remove(user_id);
            true
        } else {
            false
        }
    }

    pub fn user_client(&self, user_id: &str) -> Option<ClientId> {
        self.inner.lock().users.get(user_id).copied()
    }

    pub fn connected_users(&self) -> usize {
        self.inner.lock().users.len()
    }
}
