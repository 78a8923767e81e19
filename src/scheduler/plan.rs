//! Hierarchical scheduling plans: default pattern, interval list, week and calendar.

use super::pattern::{PatternKind, TemporalPattern};
use crate::error::{Result, ScheduleError};
use crate::time::{Month, Weekday};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered list of patterns governing one day. Order breaks ties.
pub type IntervalList = Vec<TemporalPattern>;

/// How a weekday is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "intervals", rename_all = "snake_case")]
pub enum DayRule {
    /// No sessions on this weekday.
    Disabled,
    /// Use the schedule's default interval list.
    Inherit,
    /// Use these intervals. An empty list behaves like `Inherit`.
    Custom(IntervalList),
}

impl DayRule {
    /// Intervals in effect for the day, or `None` when disabled.
    pub fn intervals_or<'a>(&'a self, default: &'a IntervalList) -> Option<&'a IntervalList> {
        match self {
            Self::Disabled => None,
            Self::Inherit => Some(default),
            Self::Custom(list) if list.is_empty() => Some(default),
            Self::Custom(list) => Some(list),
        }
    }
}

/// Per-weekday rules. A weekday without an entry has no sessions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekPlan {
    days: BTreeMap<Weekday, DayRule>,
}

impl WeekPlan {
    /// Every weekday enabled and inheriting the default intervals.
    pub fn every_day() -> Self {
        Self {
            days: Weekday::ALL
                .into_iter()
                .map(|day| (day, DayRule::Inherit))
                .collect(),
        }
    }

    /// Builder-style [`WeekPlan::set`].
    #[must_use]
    pub fn with(mut self, day: Weekday, rule: DayRule) -> Self {
        self.set(day, rule);
        self
    }

    pub fn set(&mut self, day: Weekday, rule: DayRule) {
        self.days.insert(day, rule);
    }

    pub fn get(&self, day: Weekday) -> Option<&DayRule> {
        self.days.get(&day)
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &DayRule)> {
        self.days.iter().map(|(day, rule)| (*day, rule))
    }
}

/// How a specific calendar date is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "intervals", rename_all = "snake_case")]
pub enum DateRule {
    /// Follow the week plan for the date's weekday.
    Inherit,
    /// Use these intervals. An empty list behaves like `Inherit`.
    Custom(IntervalList),
}

/// A date entry inside a month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDate {
    pub date: NaiveDate,
    pub rule: DateRule,
}

impl CalendarDate {
    pub fn new(date: NaiveDate, rule: DateRule) -> Self {
        Self { date, rule }
    }

    /// Own intervals, or `None` when the date inherits from the week.
    pub fn custom_intervals(&self) -> Option<&IntervalList> {
        match &self.rule {
            DateRule::Custom(list) if !list.is_empty() => Some(list),
            _ => None,
        }
    }
}

/// How a month is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "days", rename_all = "snake_case")]
pub enum MonthRule {
    /// Follow the week plan from the first of the month.
    InheritWeek,
    /// Follow these dates, keyed by day of month. An empty map behaves like `InheritWeek`.
    Days(BTreeMap<u32, CalendarDate>),
}

impl MonthRule {
    /// Month rule listing the given dates.
    pub fn days(dates: impl IntoIterator<Item = CalendarDate>) -> Self {
        use chrono::Datelike;

        Self::Days(
            dates
                .into_iter()
                .map(|date| (date.date.day(), date))
                .collect(),
        )
    }
}

/// One year of the calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearPlan {
    /// Inactive years are skipped by the resolver.
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub months: BTreeMap<Month, MonthRule>,
}

fn default_active() -> bool {
    true
}

impl Default for YearPlan {
    fn default() -> Self {
        Self {
            active: true,
            months: BTreeMap::new(),
        }
    }
}

impl YearPlan {
    #[must_use]
    pub fn with_month(mut self, month: Month, rule: MonthRule) -> Self {
        self.months.insert(month, rule);
        self
    }
}

/// Years with explicit plans.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarPlan {
    years: BTreeMap<i32, YearPlan>,
}

impl CalendarPlan {
    #[must_use]
    pub fn with_year(mut self, year: i32, plan: YearPlan) -> Self {
        self.insert(year, plan);
        self
    }

    pub fn insert(&mut self, year: i32, plan: YearPlan) {
        self.years.insert(year, plan);
    }

    pub fn get(&self, year: i32) -> Option<&YearPlan> {
        self.years.get(&year)
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Years from `year` onwards, in ascending order.
    pub fn from_year(&self, year: i32) -> impl Iterator<Item = (i32, &YearPlan)> {
        self.years.range(year..).map(|(year, plan)| (*year, plan))
    }
}

/// Everything needed to resolve sessions for one schedule.
///
/// Resolution walks calendar, then week, then interval list, then the default
/// pattern, using the first level that has content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSpec {
    pub default_pattern: TemporalPattern,
    pub default_intervals: IntervalList,
    pub week: WeekPlan,
    pub calendar: CalendarPlan,
}

impl ScheduleSpec {
    pub fn new(default_pattern: TemporalPattern) -> Self {
        Self {
            default_pattern,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_intervals(mut self, intervals: IntervalList) -> Self {
        self.default_intervals = intervals;
        self
    }

    #[must_use]
    pub fn with_week(mut self, week: WeekPlan) -> Self {
        self.week = week;
        self
    }

    #[must_use]
    pub fn with_calendar(mut self, calendar: CalendarPlan) -> Self {
        self.calendar = calendar;
        self
    }

    /// A negative default start offset runs exactly one session, starting immediately.
    pub fn is_single_session(&self) -> bool {
        self.default_pattern.start_offset_ms() < 0
    }

    /// Check that the schedule has something to run.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidSpec`] when every level is empty, or
    /// [`ScheduleError::InvalidPattern`] when a pattern can neither run on its
    /// own nor borrow the default pattern's behavior.
    pub fn validate(&self) -> Result<()> {
        if self.default_pattern.kind() == PatternKind::NotSpecified
            && self.default_intervals.is_empty()
            && self.week.is_empty()
            && self.calendar.is_empty()
        {
            return Err(ScheduleError::InvalidSpec("Empty parameters".to_owned()));
        }

        if self.default_pattern.kind() != PatternKind::NotSpecified {
            self.default_pattern.validate()?;
        }

        for pattern in self.all_interval_patterns() {
            pattern.validate_window()?;
            if !pattern.is_valid() && !pattern.has_custom_interval() {
                return Err(ScheduleError::InvalidPattern(format!(
                    "{} interval is neither valid nor a custom window",
                    pattern.kind()
                )));
            }
        }
        Ok(())
    }

    fn all_interval_patterns(&self) -> impl Iterator<Item = &TemporalPattern> {
        let week = self.week.iter().filter_map(|(_, rule)| match rule {
            DayRule::Custom(list) => Some(list.iter()),
            _ => None,
        });
        let calendar = self
            .calendar
            .years
            .values()
            .flat_map(|year| year.months.values())
            .filter_map(|month| match month {
                MonthRule::Days(days) => Some(days.values()),
                MonthRule::InheritWeek => None,
            })
            .flatten()
            .filter_map(|date| match &date.rule {
                DateRule::Custom(list) => Some(list.iter()),
                DateRule::Inherit => None,
            });
        self.default_intervals
            .iter()
            .chain(week.flatten())
            .chain(calendar.flatten())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::time::{MSECS_PER_HOUR, MSECS_PER_HOUR_U64};

    fn hourly() -> TemporalPattern {
        TemporalPattern::fixed(
            MSECS_PER_HOUR_U64,
            2 * MSECS_PER_HOUR_U64,
            8 * MSECS_PER_HOUR,
            "t",
        )
    }

    #[test]
    fn empty_spec_is_rejected() {
        let err = ScheduleSpec::default().validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid schedule: Empty parameters");
    }

    #[test]
    fn week_alone_is_enough() {
        let spec = ScheduleSpec::default().with_week(WeekPlan::every_day());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn invalid_default_pattern_is_rejected() {
        let spec = ScheduleSpec::new(TemporalPattern::fixed(0, 1000, 0, "t"));
        assert!(matches!(
            spec.validate(),
            Err(ScheduleError::InvalidPattern(_))
        ));
    }

    #[test]
    fn window_only_interval_is_accepted() {
        let mut window = TemporalPattern::default();
        window.set_start_offset_ms(8 * MSECS_PER_HOUR);
        window
            .set_duration_ms(MSECS_PER_HOUR_U64)
            .expect("duration");
        let spec = ScheduleSpec::new(hourly()).with_intervals(vec![window]);
        assert!(spec.validate().is_ok());

        let spec = ScheduleSpec::new(hourly()).with_week(
            WeekPlan::default().with(
                Weekday::Friday,
                DayRule::Custom(vec![TemporalPattern::default()]),
            ),
        );
        assert!(spec.validate().is_err());
    }

    #[test]
    fn interval_window_past_the_day_is_rejected() {
        let late: TemporalPattern =
            serde_json::from_str(r#"{"start_offset_ms": 9223372036854775807, "duration_ms": 60000}"#)
                .unwrap();
        assert!(late.has_custom_interval());
        let spec = ScheduleSpec::new(hourly()).with_week(
            WeekPlan::default().with(Weekday::Monday, DayRule::Custom(vec![late])),
        );
        assert!(matches!(
            spec.validate(),
            Err(ScheduleError::InvalidPattern(_))
        ));
    }

    #[test]
    fn day_rule_inheritance() {
        let default = vec![hourly()];
        assert_eq!(DayRule::Disabled.intervals_or(&default), None);
        assert_eq!(DayRule::Inherit.intervals_or(&default), Some(&default));
        assert_eq!(
            DayRule::Custom(Vec::new()).intervals_or(&default),
            Some(&default)
        );
        let own = vec![TemporalPattern::single(0, "x")];
        assert_eq!(DayRule::Custom(own.clone()).intervals_or(&default), Some(&own));
    }

    #[test]
    fn calendar_years_iterate_in_order() {
        let calendar = CalendarPlan::default()
            .with_year(2028, YearPlan::default())
            .with_year(2025, YearPlan::default())
            .with_year(2026, YearPlan::default());
        let years: Vec<i32> = calendar.from_year(2026).map(|(year, _)| year).collect();
        assert_eq!(years, vec![2026, 2028]);
    }

    #[test]
    fn month_days_are_keyed_by_day_of_month() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
        let MonthRule::Days(days) = MonthRule::days([CalendarDate::new(date, DateRule::Inherit)])
        else {
            panic!("expected days");
        };
        assert_eq!(days.get(&21).map(|d| d.date), Some(date));
    }

    #[test]
    fn spec_serde_round_trip() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 24).unwrap();
        let spec = ScheduleSpec::new(hourly())
            .with_intervals(vec![TemporalPattern::single(1000, "a")])
            .with_week(WeekPlan::every_day().with(Weekday::Sunday, DayRule::Disabled))
            .with_calendar(CalendarPlan::default().with_year(
                2026,
                YearPlan::default().with_month(
                    Month::December,
                    MonthRule::days([CalendarDate::new(
                        date,
                        DateRule::Custom(vec![TemporalPattern::single(5, "eve")]),
                    )]),
                ),
            ));
        let json = serde_json::to_string(&spec).unwrap();
        let restored: ScheduleSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, spec);
    }
}
