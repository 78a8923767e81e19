//! Calendar names, millisecond arithmetic and the clock abstraction.
//!
//! Every pattern and resolver operation takes an explicit local
//! [`NaiveDateTime`] so that scheduling math is deterministic under test;
//! only the registry reads a [`Clock`].

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Milliseconds per second.
pub const MSECS_PER_SEC: i64 = 1000;
/// Milliseconds per minute.
pub const MSECS_PER_MIN: i64 = 60 * MSECS_PER_SEC;
/// Milliseconds per hour.
pub const MSECS_PER_HOUR: i64 = 60 * MSECS_PER_MIN;
/// Milliseconds per natural day.
pub const MSECS_PER_DAY: i64 = 24 * MSECS_PER_HOUR;

/// [`MSECS_PER_SEC`] for unsigned periods and durations.
pub const MSECS_PER_SEC_U64: u64 = MSECS_PER_SEC.unsigned_abs();
pub const MSECS_PER_MIN_U64: u64 = MSECS_PER_MIN.unsigned_abs();
pub const MSECS_PER_HOUR_U64: u64 = MSECS_PER_HOUR.unsigned_abs();
pub const MSECS_PER_DAY_U64: u64 = MSECS_PER_DAY.unsigned_abs();

/// Longest period a pattern may carry: 23:59:59.
pub const MAX_PERIOD_MS: u64 = (23 * 60 * 60 + 59 * 60 + 59) * 1000;

/// Day of the week, Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// All days, Monday to Sunday.
    pub const ALL: [Weekday; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    /// Lowercase English name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }

    /// Parse a lowercase English name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|day| day.name() == name)
    }

    /// Weekday of a calendar date.
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
            chrono::Weekday::Sun => Self::Sunday,
        }
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Month of the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    /// All months, January to December.
    pub const ALL: [Month; 12] = [
        Self::January,
        Self::February,
        Self::March,
        Self::April,
        Self::May,
        Self::June,
        Self::July,
        Self::August,
        Self::September,
        Self::October,
        Self::November,
        Self::December,
    ];

    /// Lowercase English name.
    pub fn name(self) -> &'static str {
        match self {
            Self::January => "january",
            Self::February => "february",
            Self::March => "march",
            Self::April => "april",
            Self::May => "may",
            Self::June => "june",
            Self::July => "july",
            Self::August => "august",
            Self::September => "september",
            Self::October => "october",
            Self::November => "november",
            Self::December => "december",
        }
    }

    /// Parse a lowercase English name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|month| month.name() == name)
    }

    /// Month number, 1 for January.
    pub fn number(self) -> u32 {
        match self {
            Self::January => 1,
            Self::February => 2,
            Self::March => 3,
            Self::April => 4,
            Self::May => 5,
            Self::June => 6,
            Self::July => 7,
            Self::August => 8,
            Self::September => 9,
            Self::October => 10,
            Self::November => 11,
            Self::December => 12,
        }
    }

    /// Month from its number, 1 for January.
    pub fn from_number(number: u32) -> Option<Self> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        Self::ALL.get(index).copied()
    }

    /// Month of a calendar date.
    pub fn of(date: NaiveDate) -> Self {
        Self::from_number(date.month()).unwrap_or(Self::January)
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Milliseconds elapsed since local midnight of `now`'s date.
pub fn ms_since_midnight(now: NaiveDateTime) -> i64 {
    let time = now.time();
    // chrono encodes a leap second as nanos >= 1e9
    let millis = i64::from(time.nanosecond() / 1_000_000).min(999);
    i64::from(time.num_seconds_from_midnight()) * MSECS_PER_SEC + millis
}

/// Milliseconds left until the next local midnight.
pub fn ms_to_tomorrow(now: NaiveDateTime) -> i64 {
    MSECS_PER_DAY - ms_since_midnight(now)
}

/// Whole days from `from` to `to`, or `None` if `to` is in the past.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> Option<i64> {
    let days = (to - from).num_days();
    (days >= 0).then_some(days)
}

/// Millisecond timestamp of a local wall-clock instant, for elapsed-time math.
pub fn wall_ms(now: NaiveDateTime) -> i64 {
    now.and_utc().timestamp_millis()
}

/// Render a millisecond count as `hh:mm:ss.mmm`, prefixed by whole days when needed.
pub fn format_ms(ms: i64) -> String {
    let ms = ms.max(0);
    let days = ms / MSECS_PER_DAY;
    let hours = (ms % MSECS_PER_DAY) / MSECS_PER_HOUR;
    let minutes = (ms % MSECS_PER_HOUR) / MSECS_PER_MIN;
    let seconds = (ms % MSECS_PER_MIN) / MSECS_PER_SEC;
    let millis = ms % MSECS_PER_SEC;
    if days == 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    } else {
        format!("{days} days, {hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

/// Source of the current local wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;
}

/// Reads the operating system's local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A clock that only moves when told to. Used to drive schedules deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move forward by `ms` milliseconds.
    pub fn advance(&self, ms: i64) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += chrono::Duration::milliseconds(ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
