//! Temporal patterns: one-shot, fixed-period and wavelet trigger math.
//!
//! A [`TemporalPattern`] describes when, within one natural day, a task
//! fires. All offsets are milliseconds past local midnight of the day the
//! pattern governs. Session math answers "when does the window open", and
//! trigger math answers "when, inside the open window, is the next firing".

use crate::error::{Result, ScheduleError};
use crate::time::{
    MAX_PERIOD_MS, MSECS_PER_DAY, MSECS_PER_DAY_U64, MSECS_PER_HOUR_U64, MSECS_PER_MIN_U64,
    MSECS_PER_SEC_U64,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A wavelet trigger this close to `now` is dropped unless `now` sits exactly on the boundary.
pub const WAVELET_DEBOUNCE_MS: i64 = 100;

/// Slack subtracted from a session's end before deciding it is already over.
pub const SESSION_END_SLACK_MS: i64 = 200;

/// Repetition behavior of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// No type set; can never trigger.
    #[default]
    NotSpecified,
    /// Fires once at the start offset.
    Single,
    /// Fires every period inside the session window.
    Static,
    /// Fires on quadrant boundaries of a sine wave inside the session window.
    Wavelet,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotSpecified => "NOT_SPECIFIED",
            Self::Single => "SINGLE",
            Self::Static => "STATIC",
            Self::Wavelet => "WAVELET",
        };
        f.write_str(name)
    }
}

/// One of the four quadrant boundaries of a wavelet cycle.
///
/// Over one period starting at phase 0 the boundaries are reached in the
/// order peak (90°), sinking (180°), valley (270°), rising (360°/0°).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WavePoint {
    #[default]
    NotSpecified,
    Rising,
    Peak,
    Sinking,
    Valley,
}

impl WavePoint {
    /// The boundary reached one quadrant after this one.
    ///
    /// `NotSpecified` maps to itself.
    pub fn successor(self) -> Self {
        match self {
            Self::NotSpecified => Self::NotSpecified,
            Self::Sinking => Self::Valley,
            Self::Valley => Self::Rising,
            Self::Rising => Self::Peak,
            Self::Peak => Self::Sinking,
        }
    }

    /// Boundary at the start of quadrant `quadrant` (0..4) of a period.
    fn at_quadrant_start(quadrant: usize) -> Self {
        match quadrant % 4 {
            0 => Self::Rising,
            1 => Self::Peak,
            2 => Self::Sinking,
            _ => Self::Valley,
        }
    }

    /// Boundary at the end of quadrant `quadrant` (0..4) of a period.
    fn at_quadrant_end(quadrant: usize) -> Self {
        Self::at_quadrant_start(quadrant + 1)
    }
}

/// Task identifiers fired at each wave point.
///
/// `Single` and `Static` patterns fire the `peak` slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSlots {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valley: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rising: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sinking: Option<String>,
}

impl TaskSlots {
    /// Slots with only the peak task set.
    pub fn peak_only(task: impl Into<String>) -> Self {
        Self {
            peak: Some(task.into()),
            ..Self::default()
        }
    }

    /// Task configured for a wave point. Empty names count as unset.
    pub fn get(&self, point: WavePoint) -> Option<&str> {
        let slot = match point {
            WavePoint::NotSpecified => return None,
            WavePoint::Peak => &self.peak,
            WavePoint::Valley => &self.valley,
            WavePoint::Rising => &self.rising,
            WavePoint::Sinking => &self.sinking,
        };
        slot.as_deref().filter(|task| !task.is_empty())
    }

    /// Whether a wave point has a task.
    pub fn has(&self, point: WavePoint) -> bool {
        self.get(point).is_some()
    }

    /// Whether no wave point has a task.
    pub fn is_empty(&self) -> bool {
        [
            WavePoint::Peak,
            WavePoint::Valley,
            WavePoint::Rising,
            WavePoint::Sinking,
        ]
        .into_iter()
        .all(|point| !self.has(point))
    }
}

/// A period split into clock units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodParts {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub millis: u64,
}

impl PeriodParts {
    /// Split a millisecond period into hours, minutes, seconds and millis.
    pub fn from_ms(period_ms: u64) -> Self {
        let hour = MSECS_PER_HOUR_U64;
        let minute = MSECS_PER_MIN_U64;
        let second = MSECS_PER_SEC_U64;
        Self {
            hours: period_ms / hour,
            minutes: (period_ms % hour) / minute,
            seconds: (period_ms % minute) / second,
            millis: period_ms % second,
        }
    }

    /// Recombine into a millisecond period.
    pub fn total_ms(&self) -> u64 {
        self.hours * MSECS_PER_HOUR_U64
            + self.minutes * MSECS_PER_MIN_U64
            + self.seconds * MSECS_PER_SEC_U64
            + self.millis
    }

    /// Whether every unit is zero.
    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0 && self.seconds == 0 && self.millis == 0
    }
}

/// Result of a trigger computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    /// Milliseconds from `now` until the trigger fires.
    pub in_ms: i64,
    /// Kind of pattern that produced the trigger.
    pub kind: PatternKind,
    /// Wave point the trigger lands on (`NotSpecified` unless wavelet).
    pub wave_point: WavePoint,
}

/// One repeating or one-shot time behavior within a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalPattern {
    kind: PatternKind,
    period_ms: u64,
    #[serde(deserialize_with = "deserialize_phase")]
    phase_degrees: f64,
    duration_ms: u64,
    start_offset_ms: i64,
    tasks: TaskSlots,
}

impl Default for TemporalPattern {
    fn default() -> Self {
        Self {
            kind: PatternKind::NotSpecified,
            period_ms: 0,
            phase_degrees: 0.0,
            duration_ms: MSECS_PER_DAY_U64,
            start_offset_ms: 0,
            tasks: TaskSlots::default(),
        }
    }
}

impl TemporalPattern {
    /// A pattern that fires `task` once, `start_offset_ms` past midnight.
    pub fn single(start_offset_ms: i64, task: impl Into<String>) -> Self {
        Self {
            kind: PatternKind::Single,
            start_offset_ms,
            tasks: TaskSlots::peak_only(task),
            ..Self::default()
        }
    }

    /// A pattern that fires `task` every `period_ms` for `duration_ms`, starting at `start_offset_ms`.
    ///
    /// A negative start offset means "start immediately when asked".
    pub fn fixed(
        period_ms: u64,
        duration_ms: u64,
        start_offset_ms: i64,
        task: impl Into<String>,
    ) -> Self {
        Self {
            kind: PatternKind::Static,
            period_ms,
            duration_ms,
            start_offset_ms,
            tasks: TaskSlots::peak_only(task),
            ..Self::default()
        }
    }

    /// A sine-shaped pattern firing the configured quadrant tasks.
    pub fn wavelet(
        period_ms: u64,
        phase_degrees: f64,
        duration_ms: u64,
        start_offset_ms: i64,
        tasks: TaskSlots,
    ) -> Self {
        Self {
            kind: PatternKind::Wavelet,
            period_ms,
            phase_degrees: normalize_phase(phase_degrees),
            duration_ms,
            start_offset_ms,
            tasks,
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn phase_degrees(&self) -> f64 {
        self.phase_degrees
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn start_offset_ms(&self) -> i64 {
        self.start_offset_ms
    }

    pub fn tasks(&self) -> &TaskSlots {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskSlots {
        &mut self.tasks
    }

    /// Task fired by `Single` and `Static` patterns.
    pub fn primary_task(&self) -> Option<&str> {
        self.tasks.get(WavePoint::Peak)
    }

    /// The period split into hours, minutes, seconds and millis.
    pub fn period_parts(&self) -> PeriodParts {
        PeriodParts::from_ms(self.period_ms)
    }

    pub fn set_kind(&mut self, kind: PatternKind) {
        self.kind = kind;
    }

    pub fn set_start_offset_ms(&mut self, start_offset_ms: i64) {
        self.start_offset_ms = start_offset_ms;
    }

    /// Phase outside `(0, 360)` is stored as 0.
    pub fn set_phase_degrees(&mut self, phase_degrees: f64) {
        self.phase_degrees = normalize_phase(phase_degrees);
    }

    /// # Errors
    ///
    /// Rejects periods longer than 23:59:59.
    pub fn set_period_ms(&mut self, period_ms: u64) -> Result<()> {
        if period_ms > MAX_PERIOD_MS {
            return Err(ScheduleError::InvalidPattern(format!(
                "period {period_ms}ms exceeds the 23:59:59 maximum"
            )));
        }
        self.period_ms = period_ms;
        Ok(())
    }

    /// # Errors
    ///
    /// Rejects durations longer than one day.
    pub fn set_duration_ms(&mut self, duration_ms: u64) -> Result<()> {
        if duration_ms > MSECS_PER_DAY_U64 {
            return Err(ScheduleError::InvalidPattern(format!(
                "duration {duration_ms}ms exceeds one day"
            )));
        }
        self.duration_ms = duration_ms;
        Ok(())
    }

    /// Set the period from clock units.
    ///
    /// # Errors
    ///
    /// Rejects units out of clock range (hours < 24, minutes and seconds < 60, millis < 1000).
    pub fn set_period_parts(&mut self, parts: PeriodParts) -> Result<()> {
        if parts.hours >= 24 || parts.minutes >= 60 || parts.seconds >= 60 || parts.millis >= 1000
        {
            return Err(ScheduleError::InvalidPattern(format!(
                "period parts out of range: {parts:?}"
            )));
        }
        self.set_period_ms(parts.total_ms())
    }

    /// Check the type-specific invariant.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidPattern`] describing the violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.kind != PatternKind::NotSpecified {
            self.validate_window()?;
        }
        match self.kind {
            PatternKind::NotSpecified => Err(ScheduleError::InvalidPattern(
                "pattern type is not specified".to_owned(),
            )),
            PatternKind::Single => {
                if self.start_offset_ms < 0 || self.start_offset_ms > MSECS_PER_DAY {
                    return Err(ScheduleError::InvalidPattern(format!(
                        "single start offset {}ms is outside the day",
                        self.start_offset_ms
                    )));
                }
                Ok(())
            }
            PatternKind::Static => {
                if self.period_ms == 0 || self.period_ms >= MSECS_PER_DAY_U64 {
                    return Err(ScheduleError::InvalidPattern(format!(
                        "static period {}ms must be within (0, 1 day)",
                        self.period_ms
                    )));
                }
                Ok(())
            }
            PatternKind::Wavelet => {
                if self.period_ms == 0 || self.period_ms > MAX_PERIOD_MS {
                    return Err(ScheduleError::InvalidPattern(format!(
                        "wavelet period {}ms must be within (0, 23:59:59]",
                        self.period_ms
                    )));
                }
                Ok(())
            }
        }
    }

    /// Check that the session window fits in one day.
    ///
    /// Applies to window-only interval entries as well as typed patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidPattern`] for a duration over one day or a
    /// start offset past the end of the day.
    pub fn validate_window(&self) -> Result<()> {
        if self.duration_ms > MSECS_PER_DAY_U64 {
            return Err(ScheduleError::InvalidPattern(format!(
                "duration {}ms exceeds one day",
                self.duration_ms
            )));
        }
        if self.start_offset_ms > MSECS_PER_DAY {
            return Err(ScheduleError::InvalidPattern(format!(
                "start offset {}ms is past the end of the day",
                self.start_offset_ms
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// `false` when the window covers a full natural day, `true` otherwise.
    pub fn has_custom_interval(&self) -> bool {
        let duration = self.duration();
        !(duration.saturating_sub(self.start_offset_ms) == MSECS_PER_DAY
            || duration > MSECS_PER_DAY)
    }

    /// Whether the phase sits exactly on a quadrant boundary.
    pub fn has_clean_phase(&self) -> bool {
        [0.0, 90.0, 180.0, 270.0].contains(&self.phase_degrees)
    }

    /// A repeating pattern whose window is the whole day from midnight.
    pub fn is_full_day(&self) -> bool {
        matches!(self.kind, PatternKind::Static | PatternKind::Wavelet)
            && self.start_offset_ms == 0
            && self.duration() == MSECS_PER_DAY
            && !self.has_custom_interval()
    }

    /// Copy whose window starts at `now` and lasts until midnight.
    pub fn anchored_at(&self, now: NaiveDateTime) -> Self {
        let now_ms = crate::time::ms_since_midnight(now);
        Self {
            start_offset_ms: now_ms,
            duration_ms: (MSECS_PER_DAY - now_ms).unsigned_abs(),
            ..self.clone()
        }
    }

    /// `base`'s behavior running inside this pattern's window.
    pub fn merged_into(&self, base: &TemporalPattern) -> Self {
        Self {
            start_offset_ms: self.start_offset_ms,
            duration_ms: self.duration_ms,
            ..base.clone()
        }
    }

    /// Milliseconds until this pattern's session opens.
    ///
    /// With `ignore_current_time` the raw start offset is returned. A session
    /// that opened earlier today and is still running yields 0. A session that
    /// already ended yields [`ScheduleError::SessionNotFound`], unless
    /// `look_tomorrow` asks for the same start time on the following day.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::SessionNotFound`] when there is no session left today.
    pub fn next_session(
        &self,
        now: NaiveDateTime,
        ignore_current_time: bool,
        look_tomorrow: bool,
    ) -> Result<i64> {
        if ignore_current_time {
            return Ok(self.start_offset_ms.max(0));
        }

        let now_ms = crate::time::ms_since_midnight(now);
        let mut ended = true;
        if self.kind != PatternKind::Single {
            let end = self
                .start_offset_ms
                .saturating_add(self.duration())
                .saturating_sub(SESSION_END_SLACK_MS);
            if end < now_ms {
                if look_tomorrow {
                    return Ok((MSECS_PER_DAY - now_ms).saturating_add(self.start_offset_ms));
                }
                return Err(ScheduleError::SessionNotFound);
            }
            ended = false;
        }

        let delta = if self.has_custom_interval() {
            self.start_offset_ms.saturating_sub(now_ms)
        } else {
            0
        };

        if delta < 0 {
            if !ended {
                return Ok(0);
            }
            return Err(ScheduleError::SessionNotFound);
        }
        Ok(delta)
    }

    /// Milliseconds until the next firing and the wave point it lands on.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::TriggerNotFound`] when the pattern is invalid,
    /// outside its window, or has nothing to fire.
    pub fn next_trigger(&self, now: NaiveDateTime) -> Result<Trigger> {
        if !self.is_valid() {
            return Err(ScheduleError::TriggerNotFound);
        }
        let now_ms = crate::time::ms_since_midnight(now);
        match self.kind {
            PatternKind::Single => self.next_single_trigger(now_ms),
            PatternKind::Static => self.next_static_trigger(now_ms),
            PatternKind::Wavelet => self.next_wavelet_trigger(now_ms),
            PatternKind::NotSpecified => Err(ScheduleError::TriggerNotFound),
        }
    }

    fn duration(&self) -> i64 {
        i64::try_from(self.duration_ms).unwrap_or(i64::MAX)
    }

    fn period(&self) -> i64 {
        i64::try_from(self.period_ms).unwrap_or(i64::MAX)
    }

    /// The `[start, stop]` window (ms past midnight) containing `now_ms`, if any.
    fn current_window(&self, now_ms: i64) -> Option<(i64, i64)> {
        if matches!(self.kind, PatternKind::Single | PatternKind::NotSpecified) {
            return None;
        }

        let duration = self.duration();
        if self.start_offset_ms < 0 && self.has_custom_interval() && duration > 0 {
            return Some((now_ms, now_ms.saturating_add(duration)));
        }

        let start = self.start_offset_ms;
        if now_ms < start {
            return None;
        }
        let stop = start.saturating_add(duration);
        if now_ms > stop {
            return None;
        }
        Some((start, stop))
    }

    fn next_single_trigger(&self, now_ms: i64) -> Result<Trigger> {
        let trigger_at = self.start_offset_ms;
        if now_ms > trigger_at {
            return Err(ScheduleError::TriggerNotFound);
        }
        Ok(Trigger {
            in_ms: trigger_at - now_ms,
            kind: PatternKind::Single,
            wave_point: WavePoint::NotSpecified,
        })
    }

    fn next_static_trigger(&self, now_ms: i64) -> Result<Trigger> {
        if self.primary_task().is_none() {
            return Err(ScheduleError::TriggerNotFound);
        }
        let (window_start, window_stop) = self
            .current_window(now_ms)
            .ok_or(ScheduleError::TriggerNotFound)?;

        let period = self.period();
        let steps = (self.duration_ms as f64 / self.period_ms as f64).round() as i64;
        let step = now_ms.saturating_sub(window_start).div_euclid(period);
        if step < 0 || step >= steps {
            return Err(ScheduleError::TriggerNotFound);
        }

        let step_start = window_start.saturating_add(step.saturating_mul(period));
        let in_ms = if step_start == now_ms {
            0
        } else {
            step_start.saturating_add(period).saturating_sub(now_ms)
        };
        if now_ms.saturating_add(in_ms) > window_stop {
            return Err(ScheduleError::TriggerNotFound);
        }

        Ok(Trigger {
            in_ms,
            kind: PatternKind::Static,
            wave_point: WavePoint::NotSpecified,
        })
    }

    fn next_wavelet_trigger(&self, now_ms: i64) -> Result<Trigger> {
        if self.tasks.is_empty() {
            return Err(ScheduleError::TriggerNotFound);
        }
        let (window_start, window_stop) = self
            .current_window(now_ms)
            .ok_or(ScheduleError::TriggerNotFound)?;

        let period = self.period_ms as f64;
        let quarter = period / 4.0;
        let phase_offset = period * self.phase_degrees / 360.0;
        let now = now_ms as f64;

        // periods begin at window_start - phase_offset + i * period
        let first_period = window_start as f64 - phase_offset;
        let index = ((now - first_period) / period).floor();
        let period_start = first_period + index * period;
        let quadrant = (((now - period_start) / quarter).floor().max(0.0) as usize).min(3);
        let quadrant_start = period_start + quadrant as f64 * quarter;
        let on_boundary = quadrant_start == now;

        let start_point = WavePoint::at_quadrant_start(quadrant);
        let (target, wave_point) =
            if on_boundary && self.has_clean_phase() && self.tasks.has(start_point) {
                (quadrant_start, start_point)
            } else {
                (0..4)
                    .map(|ahead| {
                        (
                            quadrant_start + quarter * (ahead + 1) as f64,
                            WavePoint::at_quadrant_end(quadrant + ahead),
                        )
                    })
                    .find(|(_, point)| self.tasks.has(*point))
                    .ok_or(ScheduleError::TriggerNotFound)?
            };

        let in_ms = (target - now).floor() as i64;
        if in_ms <= WAVELET_DEBOUNCE_MS && !on_boundary {
            return Err(ScheduleError::TriggerNotFound);
        }
        if now_ms.saturating_add(in_ms) > window_stop {
            return Err(ScheduleError::TriggerNotFound);
        }

        Ok(Trigger {
            in_ms,
            kind: PatternKind::Wavelet,
            wave_point,
        })
    }
}

fn normalize_phase(phase_degrees: f64) -> f64 {
    if phase_degrees > 0.0 && phase_degrees < 360.0 {
        phase_degrees
    } else {
        0.0
    }
}

fn deserialize_phase<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    f64::deserialize(deserializer).map(normalize_phase)
}
