//! On-disk schedule documents.
//!
//! A document is the JSON form of a [`ScheduleSpec`], with each level tagged
//! by a mode so that "use the default" is explicit:
//!
//! ```json
//! {
//!   "version": 1,
//!   "time": {
//!     "mode": "custom",
//!     "levels": {
//!       "frequency": { "frequency_mode": "custom", "pattern": { "kind": "static", ... } },
//!       "clock": { "clock_mode": "all_day" },
//!       "week": { "week_mode": "every_day" },
//!       "calendar": { "calendar_mode": "every_month" }
//!     }
//!   }
//! }
//! ```

use super::pattern::TemporalPattern;
use super::plan::{CalendarPlan, IntervalList, ScheduleSpec, WeekPlan};
use crate::error::{Result, ScheduleError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Current document format version.
pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

/// A serialized schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    pub time: TimeDefinition,
}

/// Top-level time mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "levels", rename_all = "snake_case")]
pub enum TimeDefinition {
    /// Every level left at its default.
    Always,
    Custom(CustomTime),
}

/// Mode of each plan level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTime {
    pub frequency: FrequencyDefinition,
    pub clock: ClockDefinition,
    pub week: WeekDefinition,
    pub calendar: CalendarDefinition,
}

/// Default pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frequency_mode", content = "pattern", rename_all = "snake_case")]
pub enum FrequencyDefinition {
    Asap,
    Custom(TemporalPattern),
}

/// Default interval list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clock_mode", content = "intervals", rename_all = "snake_case")]
pub enum ClockDefinition {
    AllDay,
    Custom(IntervalList),
}

/// Week plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "week_mode", content = "days", rename_all = "snake_case")]
pub enum WeekDefinition {
    EveryDay,
    Custom(WeekPlan),
}

/// Calendar plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "calendar_mode", content = "years", rename_all = "snake_case")]
pub enum CalendarDefinition {
    EveryMonth,
    Custom(CalendarPlan),
}

impl ScheduleDocument {
    /// Describe `spec`, marking every level left at its default.
    pub fn from_spec(spec: &ScheduleSpec) -> Self {
        let time = if *spec == ScheduleSpec::default() {
            TimeDefinition::Always
        } else {
            TimeDefinition::Custom(CustomTime {
                frequency: if spec.default_pattern == TemporalPattern::default() {
                    FrequencyDefinition::Asap
                } else {
                    FrequencyDefinition::Custom(spec.default_pattern.clone())
                },
                clock: if spec.default_intervals.is_empty() {
                    ClockDefinition::AllDay
                } else {
                    ClockDefinition::Custom(spec.default_intervals.clone())
                },
                week: if spec.week.is_empty() {
                    WeekDefinition::EveryDay
                } else {
                    WeekDefinition::Custom(spec.week.clone())
                },
                calendar: if spec.calendar.is_empty() {
                    CalendarDefinition::EveryMonth
                } else {
                    CalendarDefinition::Custom(spec.calendar.clone())
                },
            })
        };
        Self {
            version: DOCUMENT_VERSION,
            time,
        }
    }

    /// Build the spec this document describes.
    pub fn into_spec(self) -> ScheduleSpec {
        let TimeDefinition::Custom(CustomTime {
            frequency,
            clock,
            week,
            calendar,
        }) = self.time
        else {
            return ScheduleSpec::default();
        };

        ScheduleSpec {
            default_pattern: match frequency {
                FrequencyDefinition::Asap => TemporalPattern::default(),
                FrequencyDefinition::Custom(pattern) => pattern,
            },
            default_intervals: match clock {
                ClockDefinition::AllDay => IntervalList::new(),
                ClockDefinition::Custom(list) => list,
            },
            week: match week {
                WeekDefinition::EveryDay => WeekPlan::default(),
                WeekDefinition::Custom(week) => week,
            },
            calendar: match calendar {
                CalendarDefinition::EveryMonth => CalendarPlan::default(),
                CalendarDefinition::Custom(calendar) => calendar,
            },
        }
    }

    /// Parse a document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Document`] on malformed JSON or an unsupported version.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: Self =
            serde_json::from_str(json).map_err(|e| ScheduleError::Document(e.to_string()))?;
        if document.version > DOCUMENT_VERSION {
            return Err(ScheduleError::Document(format!(
                "unsupported document version {} (newest supported is {DOCUMENT_VERSION})",
                document.version
            )));
        }
        Ok(document)
    }

    /// Render as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Document`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ScheduleError::Document(e.to_string()))
    }

    /// Load a document from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let document = Self::from_json(&raw)?;
        debug!("loaded schedule document from {}", path.display());
        Ok(document)
    }

    /// Save the document as JSON, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::pattern::TaskSlots;
    use crate::scheduler::plan::{CalendarDate, DateRule, DayRule, MonthRule, YearPlan};
    use crate::time::{MSECS_PER_HOUR, MSECS_PER_HOUR_U64, Month, Weekday};
    use chrono::NaiveDate;

    fn full_spec() -> ScheduleSpec {
        let wavelet = TemporalPattern::wavelet(
            40_000,
            90.0,
            MSECS_PER_HOUR_U64,
            8 * MSECS_PER_HOUR,
            TaskSlots {
                peak: Some("p".to_owned()),
                rising: Some("r".to_owned()),
                ..TaskSlots::default()
            },
        );
        let date = NaiveDate::from_ymd_opt(2027, 2, 14).unwrap();
        ScheduleSpec::new(TemporalPattern::fixed(60_000, 3_600_000, -1, "minute"))
            .with_intervals(vec![wavelet.clone()])
            .with_week(
                WeekPlan::every_day()
                    .with(Weekday::Saturday, DayRule::Disabled)
                    .with(Weekday::Sunday, DayRule::Custom(vec![wavelet])),
            )
            .with_calendar(
                CalendarPlan::default().with_year(
                    2027,
                    YearPlan::default()
                        .with_month(Month::January, MonthRule::InheritWeek)
                        .with_month(
                            Month::February,
                            MonthRule::days([CalendarDate::new(
                                date,
                                DateRule::Custom(vec![TemporalPattern::single(1, "love")]),
                            )]),
                        ),
                ),
            )
    }

    #[test]
    fn empty_spec_is_always() {
        let document = ScheduleDocument::from_spec(&ScheduleSpec::default());
        assert_eq!(document.time, TimeDefinition::Always);
        assert_eq!(document.into_spec(), ScheduleSpec::default());
    }

    #[test]
    fn default_levels_use_default_modes() {
        let spec = ScheduleSpec::default().with_week(WeekPlan::every_day());
        let document = ScheduleDocument::from_spec(&spec);
        let TimeDefinition::Custom(CustomTime {
            frequency,
            clock,
            calendar,
            ..
        }) = &document.time
        else {
            panic!("expected custom time");
        };
        assert_eq!(*frequency, FrequencyDefinition::Asap);
        assert_eq!(*clock, ClockDefinition::AllDay);
        assert_eq!(*calendar, CalendarDefinition::EveryMonth);
    }

    #[test]
    fn file_round_trip_preserves_spec() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("schedules").join("one.json");
        let spec = full_spec();

        ScheduleDocument::from_spec(&spec).save(&path).expect("save");
        let loaded = ScheduleDocument::load(&path).expect("load");
        assert_eq!(loaded.version, DOCUMENT_VERSION);
        assert_eq!(loaded.into_spec(), spec);
    }

    #[test]
    fn json_uses_mode_tags() {
        let json = ScheduleDocument::from_spec(&full_spec()).to_json().unwrap();
        assert!(json.contains("\"mode\": \"custom\""));
        assert!(json.contains("\"frequency_mode\": \"custom\""));
        assert!(json.contains("\"week_mode\": \"custom\""));
        assert!(json.contains("\"saturday\""));
    }

    #[test]
    fn newer_versions_are_rejected() {
        let err = ScheduleDocument::from_json(r#"{"version": 99, "time": {"mode": "always"}}"#)
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Document(_)));
    }

    #[test]
    fn missing_version_defaults_to_current() {
        let document = ScheduleDocument::from_json(r#"{"time": {"mode": "always"}}"#).unwrap();
        assert_eq!(document.version, DOCUMENT_VERSION);
    }

    #[test]
    fn malformed_json_is_a_document_error() {
        assert!(matches!(
            ScheduleDocument::from_json("{not json"),
            Err(ScheduleError::Document(_))
        ));
    }
}
