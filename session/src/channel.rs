//! Channel names.
//!
//! Per-security channels are written `{securityId}-{stream}[-{hours}]`, for
//! example `42-quote-regular` or `7-all`. The single global channel
//! `tape-bursts` carries burst alerts.

use std::fmt;
use std::str::FromStr;

use common::time::{is_extended_hours, is_regular_hours};
use market::SecurityId;

use crate::error::SessionError;

pub const TAPE_BURSTS: &str = "tape-bursts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Quote,
    /// Every trade.
    Fast,
    /// At most one trade per second.
    Slow,
    /// Every trade and quote, no hours filter.
    All,
    Close,
}

impl StreamType {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Quote => "quote",
            StreamType::Fast => "fast",
            StreamType::Slow => "slow",
            StreamType::All => "all",
            StreamType::Close => "close",
        }
    }
}

impl FromStr for StreamType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quote" => Ok(StreamType::Quote),
            "fast" => Ok(StreamType::Fast),
            "slow" => Ok(StreamType::Slow),
            "all" => Ok(StreamType::All),
            "close" => Ok(StreamType::Close),
            other => Err(SessionError::InvalidChannel(format!("unknown stream type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoursMode {
    /// 09:30 to 16:00
    Regular,
    /// 04:00 to 20:00
    Extended,
}

impl HoursMode {
    pub fn as_str(self) -> &'static str {
        match self {
            HoursMode::Regular => "regular",
            HoursMode::Extended => "extended",
        }
    }

    pub fn accepts(self, ts_ms: i64) -> bool {
        match self {
            HoursMode::Regular => is_regular_hours(ts_ms),
            HoursMode::Extended => is_extended_hours(ts_ms),
        }
    }

    pub fn is_extended(self) -> bool {
        self == HoursMode::Extended
    }
}

impl FromStr for HoursMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(HoursMode::Regular),
            "extended" => Ok(HoursMode::Extended),
            other => Err(SessionError::InvalidChannel(format!("unknown hours mode {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecurityChannel {
    pub security_id: SecurityId,
    pub stream: StreamType,
    pub hours: Option<HoursMode>,
}

impl SecurityChannel {
    pub fn new(security_id: SecurityId, stream: StreamType, hours: Option<HoursMode>) -> Self {
        Self {
            security_id,
            stream,
            hours,
        }
    }

    /// Whether an event at `ts_ms` belongs on this channel.
    pub fn accepts(&self, ts_ms: i64) -> bool {
        self.hours.is_none_or(|h| h.accepts(ts_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Security(SecurityChannel),
    TapeBursts,
}

impl ChannelName {
    pub fn security(&self) -> Option<&SecurityChannel> {
        match self {
            ChannelName::Security(c) => Some(c),
            ChannelName::TapeBursts => None,
        }
    }
}

impl From<SecurityChannel> for ChannelName {
    fn from(c: SecurityChannel) -> Self {
        ChannelName::Security(c)
    }
}

impl fmt::Display for SecurityChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.security_id, self.stream.as_str())?;
        if let Some(hours) = self.hours {
            write!(f, "-{}", hours.as_str())?;
        }
        Ok(())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelName::Security(c) => fmt::Display::fmt(c, f),
            ChannelName::TapeBursts => f.write_str(TAPE_BURSTS),
        }
    }
}

impl FromStr for ChannelName {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == TAPE_BURSTS {
            return Ok(ChannelName::TapeBursts);
        }

        let invalid = || SessionError::InvalidChannel(s.to_string());
        let parts: Vec<&str> = s.split('-').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(invalid());
        }

        let id = parts[0];
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let security_id: SecurityId = id.parse().map_err(|_| invalid())?;

        let stream: StreamType = parts[1].parse().map_err(|_| invalid())?;
        let hours = match parts.get(2) {
            Some(h) => Some(h.parse::<HoursMode>().map_err(|_| invalid())?),
            None => None,
        };

        if stream == StreamType::All && hours.is_some() {
            return Err(invalid());
        }

        Ok(ChannelName::Security(SecurityChannel {
            security_id,
            stream,
            hours,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_security_channels() {
        let c: ChannelName = "42-quote-regular".parse().unwrap();
        assert_eq!(
            c,
            ChannelName::Security(SecurityChannel::new(42, StreamType::Quote, Some(HoursMode::Regular)))
        );

        let c: ChannelName = "7-fast".parse().unwrap();
        assert_eq!(c.security().unwrap().hours, None);

        assert_eq!("tape-bursts".parse::<ChannelName>(), Ok(ChannelName::TapeBursts));
    }

    #[test]
    fn display_is_canonical() {
        for name in ["42-quote-regular", "1-slow-extended", "9-all", "3-close", TAPE_BURSTS] {
            let c: ChannelName = name.parse().unwrap();
            assert_eq!(c.to_string(), name);
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in [
            "",
            "42",
            "abc-quote",
            "-1-quote",
            "42-trades",
            "42-quote-overnight",
            "42-all-regular",
            "42-fast-regular-x",
            "tape",
        ] {
            assert!(
                matches!(bad.parse::<ChannelName>(), Err(SessionError::InvalidChannel(_))),
                "{bad} should be rejected"
            );
        }
    }
}
