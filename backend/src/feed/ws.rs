use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::feed::events::{FeedEvent, parse_feed_message};

pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Subscribes to every trade, quote and minute aggregate.
pub const DEFAULT_SUBSCRIPTION: &str = "T.*,Q.*,AM.*";

/// Websocket client for the live trade/quote feed.
pub struct FeedClient {
    pub ws_url: String,
    api_key: String,
    subscription: String,
}

impl FeedClient {
    pub fn new(ws_url: String, api_key: String) -> Self {
        Self {
            ws_url,
            api_key,
            subscription: DEFAULT_SUBSCRIPTION.to_string(),
        }
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = subscription.into();
        self
    }

    fn auth_message(&self) -> Message {
        Message::Text(json!({"action": "auth", "params": self.api_key}).to_string().into())
    }

    fn subscribe_message(&self) -> Message {
        Message::Text(json!({"action": "subscribe", "params": self.subscription}).to_string().into())
    }

    /// Streams feed events into `sender` until the receiver is dropped,
    /// reconnecting after every disconnect.
    #[instrument(skip(self, sender), fields(url = %self.ws_url))]
    pub async fn run(&self, sender: Sender<FeedEvent>) -> anyhow::Result<()> {
        info!("starting live feed worker");

        loop {
            debug!("connecting to live feed");
            match connect_async(&self.ws_url).await {
                Ok((ws, _)) => {
                    info!("feed connection established");
                    let (mut write, mut read) = ws.split();

                    let handshake = async {
                        write.send(self.auth_message()).await?;
                        write.send(self.subscribe_message()).await
                    };

                    if let Err(e) = handshake.await {
                        error!(error = ?e, "feed auth/subscribe failed; retrying connection");
                    } else {
                        while let Some(msg) = read.next().await {
                            let msg = match msg {
                                Ok(m) => m,
                                Err(e) => {
                                    warn!(error = ?e, "feed stream error");
                                    break;
                                }
                            };

                            if msg.is_ping() || msg.is_pong() {
                                trace!("feed keep-alive");
                                continue;
                            }
                            if msg.is_close() {
                                info!("feed closed by upstream");
                                break;
                            }
                            if !msg.is_text() {
                                debug!(msg_type = ?msg, "ignoring non-text feed message");
                                continue;
                            }

                            let raw = match msg.to_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    error!(error = ?e, "failed to extract text from feed message");
                                    continue;
                                }
                            };
                            trace!(raw_event = %raw, "feed message");

                            let events = match parse_feed_message(raw) {
                                Ok(events) => events,
                                Err(e) => {
                                    warn!(error = %e, raw = %raw, "failed to parse feed message");
                                    continue;
                                }
                            };

                            let mut auth_failed = false;
                            for ev in events {
                                if let FeedEvent::Status(s) = &ev {
                                    if s.is_auth_failure() {
                                        error!(message = %s.message, "feed authentication rejected");
                                        auth_failed = true;
                                    }
                                }
                                if sender.send(ev).await.is_err() {
                                    error!("feed receiver dropped; worker shutting down");
                                    return Err(anyhow::anyhow!("feed channel closed"));
                                }
                            }
                            if auth_failed {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = ?e, "feed connection failed");
                }
            }

            warn!(interval = ?RETRY_INTERVAL, "feed disconnected; reconnecting");
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}
