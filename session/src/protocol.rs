use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelName;

/// Serialized outbound message, shared by every recipient.
pub type Frame = Arc<str>;

/// Inbound control message. Unknown actions fail to parse and are dropped by
/// the connection loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    Subscribe {
        #[serde(rename = "channelName")]
        channel_name: String,
    },
    Unsubscribe {
        #[serde(rename = "channelName")]
        channel_name: String,
    },
    /// Enter (or re-seed) replay at an epoch-ms timestamp.
    Replay { timestamp: i64 },
    Pause,
    Play,
    Speed { speed: f64 },
    /// Leave replay and resume the live feed.
    Realtime,
    NextOpen,
    SetExtended {
        #[serde(rename = "extendedHours")]
        extended_hours: bool,
    },
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Serialize)]
struct DataFrame<'a, T: Serialize + ?Sized> {
    channel: String,
    data: &'a T,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    channel: &'a str,
    error: &'a str,
}

pub fn data_frame<T: Serialize + ?Sized>(
    channel: &ChannelName,
    data: &T,
) -> Result<Frame, serde_json::Error> {
    let text = serde_json::to_string(&DataFrame {
        channel: channel.to_string(),
        data,
    })?;
    Ok(Arc::from(text))
}

pub fn error_frame(channel: &str, error: &str) -> Frame {
    match serde_json::to_string(&ErrorFrame { channel, error }) {
        Ok(text) => Arc::from(text),
        Err(_) => Arc::from(r#"{"channel":"","error":"internal"}"#),
    }
}
