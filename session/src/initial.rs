//! First value a subscriber sees on a channel.

use async_trait::async_trait;
use serde_json::Value;

use common::time::{is_regular_hours, last_session_close};

use crate::channel::{HoursMode, SecurityChannel, StreamType};

#[async_trait]
pub trait InitialValueResolver: Send + Sync {
    /// Payload to send before any live update, or `None` when there is
    /// nothing to show yet.
    async fn resolve(&self, channel: &SecurityChannel, at_ms: i64) -> anyhow::Result<Option<Value>>;
}

/// What a resolver has to look up for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Last quote at or before `at_ms`.
    LastQuote { at_ms: i64 },
    /// Last trade at or before `at_ms`.
    LastTrade { at_ms: i64 },
    /// Last trade before the session close at `close_ms`.
    SessionClose { close_ms: i64 },
}

/// Maps a channel and a point in time to the lookup that answers it.
///
/// Regular-hours channels asked outside 09:30-16:00 are clamped to the most
/// recent regular close. Close channels use today's close once it has
/// passed and the prior session's before that.
pub fn lookup_for(channel: &SecurityChannel, at_ms: i64) -> Lookup {
    let clamp = |at_ms: i64| match channel.hours {
        Some(HoursMode::Regular) if !is_regular_hours(at_ms) => last_session_close(at_ms, false),
        _ => at_ms,
    };

    match channel.stream {
        StreamType::Quote => Lookup::LastQuote { at_ms: clamp(at_ms) },
        StreamType::Fast | StreamType::Slow | StreamType::All => {
            Lookup::LastTrade { at_ms: clamp(at_ms) }
        }
        StreamType::Close => {
            let extended = channel.hours.is_some_and(HoursMode::is_extended);
            Lookup::SessionClose {
                close_ms: last_session_close(at_ms, extended),
            }
        }
    }
}
