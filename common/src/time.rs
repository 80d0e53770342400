//! Exchange clock helpers.
//!
//! All session boundaries are expressed in seconds after local midnight in
//! the exchange time zone (America/New_York) and converted to epoch
//! milliseconds on demand, so daylight-saving transitions are handled by
//! `chrono-tz` rather than by fixed offsets.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

pub const EXCHANGE_TZ: Tz = chrono_tz::America::New_York;

pub const PREMARKET_OPEN_SECS: u32 = 4 * 3600;
pub const REGULAR_OPEN_SECS: u32 = 9 * 3600 + 30 * 60;
pub const REGULAR_CLOSE_SECS: u32 = 16 * 3600;
pub const AFTER_HOURS_CLOSE_SECS: u32 = 20 * 3600;

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_DAY: i64 = 86_400 * MS_PER_SECOND;

/// Bounds the calendar walks below; a week always contains a trading day.
const MAX_DAY_WALK: usize = 8;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_utc(ts_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts_ms).unwrap_or_default()
}

pub fn to_local(ts_ms: i64) -> DateTime<Tz> {
    to_utc(ts_ms).with_timezone(&EXCHANGE_TZ)
}

pub fn local_date(ts_ms: i64) -> NaiveDate {
    to_local(ts_ms).date_naive()
}

pub fn seconds_of_day(ts_ms: i64) -> u32 {
    to_local(ts_ms).num_seconds_from_midnight()
}

/// Epoch milliseconds of `secs` after local midnight on `date`.
pub fn at_local(date: NaiveDate, secs: u32) -> i64 {
    let naive = date.and_time(NaiveTime::MIN) + Duration::seconds(i64::from(secs));

    // Skipped local times (spring-forward gap) resolve to the first valid
    // instant after the gap.
    EXCHANGE_TZ
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            EXCHANGE_TZ
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| naive.and_utc().timestamp_millis())
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// 09:30 to 16:00 exchange-local.
pub fn is_regular_hours(ts_ms: i64) -> bool {
    let s = seconds_of_day(ts_ms);
    (REGULAR_OPEN_SECS..REGULAR_CLOSE_SECS).contains(&s)
}

/// 04:00 to 20:00 exchange-local.
pub fn is_extended_hours(ts_ms: i64) -> bool {
    let s = seconds_of_day(ts_ms);
    (PREMARKET_OPEN_SECS..AFTER_HOURS_CLOSE_SECS).contains(&s)
}

/// First weekday occurrence of local `secs` strictly after `ts_ms`.
pub fn next_trading_time(ts_ms: i64, secs: u32) -> i64 {
    let mut date = local_date(ts_ms);
    for _ in 0..MAX_DAY_WALK {
        if is_trading_day(date) {
            let candidate = at_local(date, secs);
            if candidate > ts_ms {
                return candidate;
            }
        }
        date = match date.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }
    ts_ms
}

/// Latest weekday occurrence of local `secs` at or before `ts_ms`.
pub fn last_trading_time(ts_ms: i64, secs: u32) -> i64 {
    let mut date = local_date(ts_ms);
    for _ in 0..MAX_DAY_WALK {
        if is_trading_day(date) {
            let candidate = at_local(date, secs);
            if candidate <= ts_ms {
                return candidate;
            }
        }
        date = match date.pred_opt() {
            Some(d) => d,
            None => break,
        };
    }
    ts_ms
}

pub fn next_session_open(ts_ms: i64, extended: bool) -> i64 {
    let open = if extended {
        PREMARKET_OPEN_SECS
    } else {
        REGULAR_OPEN_SECS
    };
    next_trading_time(ts_ms, open)
}

/// Close of the current session when `ts_ms` is already past it, otherwise
/// the close of the prior session.
pub fn last_session_close(ts_ms: i64, extended: bool) -> i64 {
    let close = if extended {
        AFTER_HOURS_CLOSE_SECS
    } else {
        REGULAR_CLOSE_SECS
    };
    last_trading_time(ts_ms, close)
}
