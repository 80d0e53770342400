#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use session::initial::InitialValueResolver;
use session::replay::{ReplayEvent, ReplaySource};
use session::{Client, ClientConfig, ClientIo, SecurityChannel, SubscriptionHub};

/// Resolver that answers every channel with the same value.
#[derive(Default)]
pub struct MockResolver {
    pub value: Mutex<Option<Value>>,
    pub fail: Mutex<bool>,
    pub delay: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<(String, i64)>>,
}

impl MockResolver {
    pub fn answering(value: Value) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl InitialValueResolver for MockResolver {
    async fn resolve(&self, channel: &SecurityChannel, at_ms: i64) -> anyhow::Result<Option<Value>> {
        self.calls.lock().push((channel.to_string(), at_ms));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock() {
            anyhow::bail!("resolver unavailable");
        }
        Ok(self.value.lock().clone())
    }
}

/// Replay source serving fixed event timestamps per channel name.
#[derive(Default)]
pub struct MockSource {
    pub events: Mutex<HashMap<String, Vec<i64>>>,
    pub fetches: Mutex<Vec<(String, i64, i64)>>,
}

impl MockSource {
    pub fn with(channel: &str, timestamps: Vec<i64>) -> Self {
        let source = Self::default();
        source.events.lock().insert(channel.to_string(), timestamps);
        source
    }
}

#[async_trait]
impl ReplaySource for MockSource {
    async fn fetch(
        &self,
        channel: &SecurityChannel,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<ReplayEvent>> {
        let name = channel.to_string();
        self.fetches.lock().push((name.clone(), from_ms, to_ms));
        Ok(self
            .events
            .lock()
            .get(&name)
            .map(|ts| {
                ts.iter()
                    .filter(|t| **t >= from_ms && **t < to_ms)
                    .map(|t| ReplayEvent {
                        ts_ms: *t,
                        data: json!({ "ts": t }),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub fn new_client(
    hub: &SubscriptionHub,
    resolver: Arc<MockResolver>,
    source: Arc<MockSource>,
    config: ClientConfig,
) -> (Client, ClientIo) {
    Client::new(hub.clone(), Some("user-1".into()), resolver, source, config)
}

/// Parses every frame currently queued.
pub fn drain(io: &mut ClientIo) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(frame) = io.outbound.try_recv() {
        out.push(serde_json::from_str(&frame).expect("frames are json"));
    }
    out
}
