//! Tidal: hierarchical task scheduler.
//!
//! Decides, for each registered schedule, when the next working session
//! starts and, inside a session, when the next task fires.
//!
//! # Architecture
//!
//! - **Patterns**: single-shot, fixed-period and wavelet trigger math within one day
//! - **Plans**: calendar, week and interval-list levels with explicit inheritance
//! - **Resolver**: picks the pattern that runs next and the time until its session
//! - **Machine**: per-schedule countdowns driven by a fixed cooldown tick
//! - **Registry**: one tokio reactor ticking every running schedule, reporting on a channel

pub mod config;
pub mod error;
pub mod scheduler;
pub mod time;

pub use config::EngineConfig;
pub use error::{Result, ScheduleError};
pub use scheduler::{ScheduleRegistry, ScheduleSpec, TemporalPattern};
pub use time::{Clock, ManualClock, SystemClock};
