//! Hierarchical task scheduler.
//!
//! Schedules resolve their next session from a calendar, week, interval list
//! or default pattern, then fire tasks from single-shot, fixed-period or
//! wavelet patterns inside that session.

pub mod document;
pub mod events;
pub mod machine;
pub mod pattern;
pub mod plan;
pub mod registry;
pub mod resolver;

pub use document::ScheduleDocument;
pub use events::{RegistryEvent, ScheduleEvent, ScheduleId};
pub use machine::{EventKind, ScheduleMachine};
pub use pattern::{PatternKind, TaskSlots, TemporalPattern, WavePoint};
pub use plan::{
    CalendarDate, CalendarPlan, DateRule, DayRule, IntervalList, MonthRule, ScheduleSpec,
    WeekPlan, YearPlan,
};
pub use registry::{RunStatus, ScheduleRegistry};
pub use resolver::{Resolution, resolve_session};
