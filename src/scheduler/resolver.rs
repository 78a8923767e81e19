//! Session resolution: walk the plan hierarchy and pick the pattern that runs next.
//!
//! Levels are consulted in priority order: calendar, week, interval list,
//! default pattern. The first level with content decides; lower levels are
//! only reached through explicit inheritance (a date inheriting its weekday,
//! a weekday inheriting the default intervals, an empty interval list falling
//! back to the default pattern).

use super::pattern::TemporalPattern;
use super::plan::{CalendarDate, DayRule, IntervalList, MonthRule, ScheduleSpec};
use crate::error::{Result, ScheduleError};
use crate::time::{self, MSECS_PER_DAY, Month, Weekday};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use tracing::debug;

/// Days scanned ahead when searching a week plan. Eight covers a weekday
/// whose session today has already ended.
const WEEK_SCAN_DAYS: u64 = 8;

/// Where the resolved pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSource {
    /// An interval list entry (calendar date, weekday or default intervals).
    Intervals,
    /// The schedule's default pattern.
    DefaultPattern,
}

/// The pattern that runs next and how far away its session is.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub pattern: TemporalPattern,
    pub ms_until_session: i64,
    pub source: PatternSource,
}

/// Resolve the next session of `spec` as seen at `now`.
///
/// # Errors
///
/// Returns [`ScheduleError::NoFutureSessions`] when no level yields a session.
pub fn resolve_session(spec: &ScheduleSpec, now: NaiveDateTime) -> Result<Resolution> {
    let resolver = Resolver {
        spec,
        now,
        today: now.date(),
    };

    let found = if !spec.calendar.is_empty() {
        debug!("resolving session from calendar");
        resolver.calendar()
    } else if !spec.week.is_empty() {
        debug!("resolving session from week plan");
        resolver.week(None)
    } else if !spec.default_intervals.is_empty() {
        debug!("resolving session from interval list");
        resolver.intervals(&spec.default_intervals, false, true)
    } else if spec.default_pattern.is_valid() {
        debug!("resolving session from default pattern");
        resolver.frequency(false)
    } else {
        None
    };

    match found {
        Some(resolution) => {
            debug!(
                "next session in {} ({} pattern)",
                time::format_ms(resolution.ms_until_session),
                resolution.pattern.kind()
            );
            Ok(resolution)
        }
        None => Err(ScheduleError::NoFutureSessions),
    }
}

struct Resolver<'a> {
    spec: &'a ScheduleSpec,
    now: NaiveDateTime,
    today: NaiveDate,
}

impl Resolver<'_> {
    /// The first active year at or after this one decides. Inside it the
    /// current month, or else the nearest later month, is binding.
    fn calendar(&self) -> Option<Resolution> {
        for (year, plan) in self.spec.calendar.from_year(self.today.year()) {
            if !plan.active {
                debug!(year, "skipping inactive calendar year");
                continue;
            }
            if plan.months.is_empty() {
                let first = NaiveDate::from_ymd_opt(year, 1, 1)?;
                return self.week(Some(first));
            }

            let from = if year == self.today.year() {
                Month::of(self.today)
            } else {
                Month::January
            };
            match plan.months.range(from..).next() {
                Some((month, rule)) => return self.month(year, *month, rule),
                None => debug!(year, "every calendar month of the year is over"),
            }
        }
        None
    }

    /// Only the first listed day at or after today is considered.
    fn month(&self, year: i32, month: Month, rule: &MonthRule) -> Option<Resolution> {
        let days = match rule {
            MonthRule::Days(days) if !days.is_empty() => days,
            _ => {
                let first = NaiveDate::from_ymd_opt(year, month.number(), 1)?;
                return self.week(Some(first));
            }
        };

        let current_month = year == self.today.year() && month == Month::of(self.today);
        let (_, date) = days
            .iter()
            .find(|(day, _)| !current_month || **day >= self.today.day())?;
        self.day(date)
    }

    fn day(&self, date: &CalendarDate) -> Option<Resolution> {
        if date.date < self.today {
            return None;
        }
        match date.custom_intervals() {
            Some(list) => self.at_date(date.date, list),
            None => {
                let weekday = Weekday::of(date.date);
                let list = match self.spec.week.get(weekday) {
                    Some(DayRule::Custom(list)) if !list.is_empty() => list,
                    _ => &self.spec.default_intervals,
                };
                self.at_date(date.date, list)
            }
        }
    }

    fn week(&self, from: Option<NaiveDate>) -> Option<Resolution> {
        if self.spec.week.is_empty() {
            return self.intervals(&self.spec.default_intervals, false, false);
        }

        let start = from.map_or(self.today, |from| from.max(self.today));
        (0..WEEK_SCAN_DAYS)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .find_map(|date| {
                let rule = self.spec.week.get(Weekday::of(date))?;
                let list = rule.intervals_or(&self.spec.default_intervals)?;
                self.at_date(date, list)
            })
    }

    /// Resolve `list` on `date`, adding the whole days between today and `date`.
    fn at_date(&self, date: NaiveDate, list: &IntervalList) -> Option<Resolution> {
        if date == self.today {
            return self.intervals(list, false, false);
        }
        if date < self.today {
            return None;
        }

        let mut resolution = self.intervals(list, true, false)?;
        let tomorrow = self.today.succ_opt()?;
        let whole_days = time::days_between(tomorrow, date)?;
        resolution.ms_until_session = resolution
            .ms_until_session
            .saturating_add(time::ms_to_tomorrow(self.now) + whole_days * MSECS_PER_DAY);
        Some(resolution)
    }

    fn intervals(
        &self,
        list: &IntervalList,
        ignore_current_time: bool,
        look_tomorrow: bool,
    ) -> Option<Resolution> {
        if list.is_empty() {
            return self.frequency(ignore_current_time);
        }

        let default = &self.spec.default_pattern;
        let mut best: Option<(i64, TemporalPattern)> = None;
        for entry in list {
            let candidate = if entry.is_valid() {
                entry.clone()
            } else if entry.has_custom_interval() && default.is_valid() {
                entry.merged_into(default)
            } else {
                continue;
            };

            let Ok(ms) = candidate.next_session(self.now, ignore_current_time, look_tomorrow)
            else {
                continue;
            };
            let closer = match &best {
                Some((best_ms, _)) => ms < *best_ms,
                None => true,
            };
            if closer {
                best = Some((ms, candidate));
            }
        }

        best.map(|(ms_until_session, pattern)| Resolution {
            pattern,
            ms_until_session,
            source: PatternSource::Intervals,
        })
    }

    fn frequency(&self, ignore_current_time: bool) -> Option<Resolution> {
        let pattern = &self.spec.default_pattern;
        if !pattern.is_valid() {
            return None;
        }
        let ignore_current_time = ignore_current_time || pattern.start_offset_ms() < 0;
        let ms_until_session = pattern
            .next_session(self.now, ignore_current_time, false)
            .ok()?;
        Some(Resolution {
            pattern: pattern.clone(),
            ms_until_session,
            source: PatternSource::DefaultPattern,
        })
    }
}
