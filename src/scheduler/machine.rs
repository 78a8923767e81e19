//! Per-schedule state machine driven by a fixed cooldown tick.
//!
//! Out of session the machine counts down to the next session resolved from
//! its [`ScheduleSpec`]. In session it counts down to the next trigger and
//! to the end of the session. Countdowns are decremented by the configured
//! tick and corrected against the wall clock every `clock_adjust_interval`
//! ticks.

use super::events::ScheduleEvent;
use super::pattern::{PatternKind, TemporalPattern, WavePoint};
use super::plan::ScheduleSpec;
use super::resolver::{PatternSource, resolve_session};
use crate::config::EngineConfig;
use crate::time::{self, wall_ms};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

/// Two triggers closer than this are treated as one.
pub const DUPLICATE_TRIGGER_GUARD_MS: i64 = 100;

/// Reason reported when a single-session schedule completes.
pub const SINGLE_SESSION_FINISHED: &str = "The single session has finished";

/// How the current session fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    #[default]
    Undecided,
    SingleShot,
    ConstantFrequency,
    Interval,
    Wavelet,
}

impl EventKind {
    /// Label attached to time-to-next-session events.
    pub fn label(self) -> &'static str {
        match self {
            Self::SingleShot => "SingleShot",
            Self::Interval => "Interval",
            Self::Wavelet => "Wavelet",
            Self::Undecided | Self::ConstantFrequency => "",
        }
    }

    fn of(kind: PatternKind, source: PatternSource) -> Self {
        match (kind, source) {
            (PatternKind::Single, _) => Self::SingleShot,
            (PatternKind::Wavelet, _) => Self::Wavelet,
            (PatternKind::Static, PatternSource::DefaultPattern) => Self::ConstantFrequency,
            (PatternKind::Static, PatternSource::Intervals) => Self::Interval,
            (PatternKind::NotSpecified, _) => Self::Undecided,
        }
    }
}

/// A countdown and the value it started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub left: i64,
    pub total: i64,
}

impl Countdown {
    pub fn new(total: i64) -> Self {
        Self { left: total, total }
    }
}

/// Compares tick-counted time against the wall clock.
#[derive(Debug, Clone, Default)]
pub struct DriftMeter {
    mark_ms: Option<i64>,
    ticks: u32,
}

impl DriftMeter {
    /// Record one tick at wall time `now_ms`.
    ///
    /// Every `interval` ticks, returns the milliseconds by which the wall
    /// clock ran ahead of `interval * tick_ms`, when that excess is larger
    /// than one tick.
    pub fn measure(&mut self, now_ms: i64, interval: u32, tick_ms: i64) -> Option<i64> {
        let Some(mark) = self.mark_ms else {
            self.mark_ms = Some(now_ms);
            self.ticks = 0;
            return None;
        };

        self.ticks += 1;
        if self.ticks < interval {
            return None;
        }

        let excess = (now_ms - mark) - i64::from(interval) * tick_ms;
        self.mark_ms = Some(now_ms);
        self.ticks = 0;
        (excess > tick_ms).then_some(excess)
    }
}

/// Observable machine state.
#[derive(Debug, Clone, Default)]
pub struct ScheduleState {
    pub event_kind: EventKind,
    pub wave_point: WavePoint,
    pub in_session: bool,
    pub next_session: Option<Countdown>,
    pub next_trigger: Option<Countdown>,
    pub time_left: Option<Countdown>,
    /// Pattern of the current or upcoming session.
    pub current: Option<TemporalPattern>,
    last_trigger_ms: Option<i64>,
    drift: DriftMeter,
}

/// State machine for one schedule.
#[derive(Debug, Clone)]
pub struct ScheduleMachine {
    spec: ScheduleSpec,
    config: EngineConfig,
    state: ScheduleState,
    single_session: bool,
    finished: Option<String>,
}

impl ScheduleMachine {
    pub fn new(spec: ScheduleSpec, config: EngineConfig) -> Self {
        let single_session = spec.is_single_session();
        Self {
            spec,
            config,
            state: ScheduleState::default(),
            single_session,
            finished: None,
        }
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Whether the machine reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Reason the machine finished, if it did.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finished.as_deref()
    }

    /// Advance the machine by one tick observed at `now`.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<ScheduleEvent> {
        let mut events = Vec::new();
        if self.finished.is_some() {
            return events;
        }

        self.correct_drift(now);
        if self.state.in_session {
            self.in_session(now, &mut events);
        } else {
            self.out_of_session(now, &mut events);
        }

        if !self.config.emit_progress {
            events.retain(|event| !event.is_progress());
        }
        events
    }

    fn correct_drift(&mut self, now: NaiveDateTime) {
        let tick = self.config.tick();
        let Some(excess) =
            self.state
                .drift
                .measure(wall_ms(now), self.config.clock_adjust_interval, tick)
        else {
            return;
        };

        debug!("correcting {excess}ms of clock drift");
        for countdown in [
            &mut self.state.next_session,
            &mut self.state.next_trigger,
            &mut self.state.time_left,
        ]
        .into_iter()
        .flatten()
        {
            countdown.left -= excess;
        }
    }

    fn out_of_session(&mut self, now: NaiveDateTime, events: &mut Vec<ScheduleEvent>) {
        let countdown = match self.state.next_session.as_mut() {
            Some(countdown) => {
                countdown.left -= self.config.tick();
                *countdown
            }
            None => match resolve_session(&self.spec, now) {
                Ok(resolution) => {
                    self.state.event_kind =
                        EventKind::of(resolution.pattern.kind(), resolution.source);
                    self.state.current = Some(resolution.pattern);
                    let countdown = Countdown::new(resolution.ms_until_session);
                    self.state.next_session = Some(countdown);
                    debug!(
                        "next {} session in {}",
                        self.state.event_kind.label(),
                        time::format_ms(countdown.left)
                    );
                    countdown
                }
                Err(e) => {
                    self.finish(e.to_string(), events);
                    return;
                }
            },
        };

        if countdown.left <= 0 {
            self.begin_session(now);
            self.in_session(now, events);
        } else {
            events.push(ScheduleEvent::TimeToNextSession {
                ms_left: countdown.left,
                ms_total: countdown.total,
                label: self.state.event_kind.label(),
            });
        }
    }

    fn begin_session(&mut self, now: NaiveDateTime) {
        if let Some(countdown) = self.state.next_session.as_mut() {
            countdown.left = 0;
        }
        if let Some(pattern) = self.state.current.as_mut() {
            if pattern.is_full_day() {
                *pattern = pattern.anchored_at(now);
            }
        }
        self.state.in_session = true;
        debug!("session started");
    }

    fn in_session(&mut self, now: NaiveDateTime, events: &mut Vec<ScheduleEvent>) {
        let tick = self.config.tick();

        if self.state.next_trigger.is_none() && !self.compute_trigger(now) {
            debug!("no trigger left in session");
            self.leave_session();
            return;
        }
        let Some(trigger) = self.state.next_trigger.as_mut() else {
            return;
        };

        trigger.left -= tick;
        if trigger.left < -tick {
            warn!(
                "trigger countdown overran by {}ms, this should never happen",
                -trigger.left
            );
            self.state.next_trigger = None;
            return;
        }

        if trigger.left <= 0 {
            let now_ms = wall_ms(now);
            if let Some(last) = self.state.last_trigger_ms {
                if now_ms < last + DUPLICATE_TRIGGER_GUARD_MS {
                    debug!("dropping duplicate trigger");
                    self.state.next_trigger = None;
                    return;
                }
            }
            self.state.last_trigger_ms = Some(now_ms);
            self.fire(events);
        } else {
            events.push(ScheduleEvent::TimeToNextTrigger {
                ms_left: trigger.left,
                ms_total: trigger.total,
            });
        }

        if self.state.event_kind == EventKind::SingleShot {
            return;
        }
        self.count_down_session(events);
    }

    fn compute_trigger(&mut self, now: NaiveDateTime) -> bool {
        let Some(pattern) = self.state.current.as_ref() else {
            return false;
        };
        let Ok(trigger) = pattern.next_trigger(now) else {
            self.state.next_trigger = None;
            return false;
        };

        let total = match trigger.kind {
            PatternKind::Wavelet => (pattern.period_ms() as f64 / 4.0).round() as i64,
            PatternKind::Static => i64::try_from(pattern.period_ms()).unwrap_or(i64::MAX),
            PatternKind::Single => trigger.in_ms,
            PatternKind::NotSpecified => return false,
        };

        self.state.wave_point = trigger.wave_point;
        self.state.next_trigger = Some(Countdown {
            left: trigger.in_ms,
            total,
        });
        true
    }

    fn fire(&mut self, events: &mut Vec<ScheduleEvent>) {
        let Some(pattern) = self.state.current.as_ref() else {
            return;
        };

        match self.state.event_kind {
            EventKind::SingleShot => {
                if let Some(task) = pattern.primary_task() {
                    events.push(ScheduleEvent::Triggered {
                        task: task.to_owned(),
                    });
                }
                self.leave_session();
            }
            EventKind::ConstantFrequency | EventKind::Interval => {
                if let Some(task) = pattern.primary_task() {
                    events.push(ScheduleEvent::Triggered {
                        task: task.to_owned(),
                    });
                }
                self.restart_trigger();
            }
            EventKind::Wavelet => {
                let point = self.state.wave_point;
                match pattern.tasks().get(point) {
                    Some(task) => events.push(ScheduleEvent::Triggered {
                        task: task.to_owned(),
                    }),
                    None => debug!("skipping empty {point:?} slot"),
                }
                self.state.wave_point = point.successor();
                self.restart_trigger();
            }
            EventKind::Undecided => {}
        }
    }

    fn restart_trigger(&mut self) {
        if let Some(trigger) = self.state.next_trigger.as_mut() {
            trigger.left = trigger.total;
        }
    }

    fn count_down_session(&mut self, events: &mut Vec<ScheduleEvent>) {
        let tick = self.config.tick();
        let duration = self
            .state
            .current
            .as_ref()
            .map_or(0, |pattern| i64::try_from(pattern.duration_ms()).unwrap_or(i64::MAX));
        let countdown = self
            .state
            .time_left
            .get_or_insert_with(|| Countdown::new(duration));
        countdown.left -= tick;
        let countdown = *countdown;

        if countdown.left > 0 {
            events.push(ScheduleEvent::TimeLeftInSession {
                ms_left: countdown.left,
                ms_total: countdown.total,
            });
            return;
        }

        if self.single_session {
            self.finish(SINGLE_SESSION_FINISHED.to_owned(), events);
        } else {
            debug!("session ended");
            self.leave_session();
        }
    }

    fn leave_session(&mut self) {
        self.state.in_session = false;
        self.state.next_session = None;
        self.state.next_trigger = None;
        self.state.time_left = None;
    }

    fn finish(&mut self, reason: String, events: &mut Vec<ScheduleEvent>) {
        info!("schedule finished: {reason}");
        self.leave_session();
        self.finished = Some(reason.clone());
        events.push(ScheduleEvent::Finished { reason });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::pattern::TaskSlots;
    use crate::time::{MSECS_PER_HOUR, MSECS_PER_HOUR_U64};
    use chrono::{Duration, NaiveDate};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn quiet() -> EngineConfig {
        EngineConfig {
            emit_progress: false,
            ..EngineConfig::default()
        }
    }

    /// Tick `machine` `count` times, 10ms apart, starting at `start`.
    fn run(machine: &mut ScheduleMachine, start: NaiveDateTime, count: i64) -> Vec<ScheduleEvent> {
        (0..count)
            .flat_map(|k| machine.tick(start + Duration::milliseconds(k * 10)))
            .collect()
    }

    fn triggered(events: &[ScheduleEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| match event {
                ScheduleEvent::Triggered { task } => Some(task.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn event_kind_labels() {
        assert_eq!(EventKind::SingleShot.label(), "SingleShot");
        assert_eq!(EventKind::Interval.label(), "Interval");
        assert_eq!(EventKind::Wavelet.label(), "Wavelet");
        assert_eq!(EventKind::ConstantFrequency.label(), "");
        assert_eq!(EventKind::Undecided.label(), "");
    }

    #[test]
    fn drift_meter_reports_excess_once_per_interval() {
        let mut meter = DriftMeter::default();
        assert_eq!(meter.measure(0, 4, 10), None);
        assert_eq!(meter.measure(10, 4, 10), None);
        assert_eq!(meter.measure(20, 4, 10), None);
        assert_eq!(meter.measure(30, 4, 10), None);
        assert_eq!(meter.measure(100, 4, 10), Some(60));
        // a fresh window starts at the last mark
        for k in 1..4 {
            assert_eq!(meter.measure(100 + k * 10, 4, 10), None);
        }
        assert_eq!(meter.measure(140, 4, 10), None);
    }

    #[test]
    fn first_tick_reports_time_to_next_session() {
        let spec = ScheduleSpec::new(TemporalPattern::single(2 * MSECS_PER_HOUR, "once"));
        let mut machine = ScheduleMachine::new(spec, EngineConfig::default());
        let events = machine.tick(at(1, 0, 0));
        assert_eq!(
            events,
            vec![ScheduleEvent::TimeToNextSession {
                ms_left: 3_600_000,
                ms_total: 3_600_000,
                label: "SingleShot",
            }]
        );
        assert_eq!(machine.state().event_kind, EventKind::SingleShot);
    }

    #[test]
    fn single_shot_fires_once_then_finishes() {
        let spec = ScheduleSpec::new(TemporalPattern::single(2 * MSECS_PER_HOUR, "once"));
        let mut machine = ScheduleMachine::new(spec, quiet());
        let events = run(&mut machine, at(1, 59, 59), 200);

        assert_eq!(triggered(&events), vec!["once"]);
        assert!(machine.is_finished());
        assert_eq!(machine.finish_reason(), Some("No future sessions found"));
        assert_eq!(
            events.last(),
            Some(&ScheduleEvent::Finished {
                reason: "No future sessions found".to_owned()
            })
        );
        assert!(machine.tick(at(3, 0, 0)).is_empty());
    }

    #[test]
    fn wavelet_fires_configured_slots_and_skips_empty_ones() {
        let pattern = TemporalPattern::wavelet(
            40_000,
            0.0,
            MSECS_PER_HOUR_U64,
            8 * MSECS_PER_HOUR,
            TaskSlots {
                peak: Some("p".to_owned()),
                valley: Some("v".to_owned()),
                ..TaskSlots::default()
            },
        );
        let mut machine = ScheduleMachine::new(ScheduleSpec::new(pattern), quiet());
        let events = run(&mut machine, at(8, 0, 0), 5_000);

        assert_eq!(triggered(&events), vec!["p", "v", "p"]);
        assert!(machine.state().in_session);
        assert_eq!(machine.state().event_kind, EventKind::Wavelet);
        assert_eq!(machine.state().wave_point, WavePoint::Sinking);
    }

    #[test]
    fn constant_frequency_restarts_countdown_after_firing() {
        let pattern = TemporalPattern::fixed(1_000, 60_000, 8 * MSECS_PER_HOUR, "tick");
        let mut machine = ScheduleMachine::new(ScheduleSpec::new(pattern), quiet());
        let events = run(&mut machine, at(8, 0, 0), 350);

        assert_eq!(machine.state().event_kind, EventKind::ConstantFrequency);
        assert_eq!(triggered(&events).len(), 4);
        let trigger = machine.state().next_trigger.expect("trigger countdown");
        assert_eq!(trigger.total, 1_000);
    }

    #[test]
    fn progress_events_follow_config() {
        let pattern = TemporalPattern::fixed(1_000, 60_000, 8 * MSECS_PER_HOUR, "tick");
        let mut machine = ScheduleMachine::new(ScheduleSpec::new(pattern), EngineConfig::default());
        let events = machine.tick(at(8, 0, 0));
        // fires at once, then counts down the session
        assert_eq!(
            events,
            vec![
                ScheduleEvent::Triggered {
                    task: "tick".to_owned()
                },
                ScheduleEvent::TimeLeftInSession {
                    ms_left: 59_990,
                    ms_total: 60_000
                },
            ]
        );
        let events = machine.tick(at(8, 0, 0) + Duration::milliseconds(10));
        assert!(events.contains(&ScheduleEvent::TimeToNextTrigger {
            ms_left: 990,
            ms_total: 1_000
        }));
    }

    #[test]
    fn single_session_finishes_when_window_closes() {
        let pattern = TemporalPattern::fixed(100, 1_000, -1, "burst");
        let mut machine = ScheduleMachine::new(ScheduleSpec::new(pattern), quiet());
        let events = run(&mut machine, at(12, 0, 0), 150);

        assert!(machine.is_finished());
        assert_eq!(machine.finish_reason(), Some(SINGLE_SESSION_FINISHED));
        assert_eq!(triggered(&events).len(), 10);
    }

    #[test]
    fn full_day_pattern_is_anchored_to_session_start() {
        let pattern = TemporalPattern::fixed(
            MSECS_PER_HOUR_U64,
            crate::time::MSECS_PER_DAY_U64,
            0,
            "hourly",
        );
        let mut machine = ScheduleMachine::new(ScheduleSpec::new(pattern), quiet());
        let events = machine.tick(at(9, 30, 0));
        assert_eq!(triggered(&events), vec!["hourly"]);

        let current = machine.state().current.as_ref().expect("pattern");
        assert_eq!(current.start_offset_ms(), 9 * MSECS_PER_HOUR + 30 * 60_000);
        assert_eq!(
            machine.state().time_left.expect("time left").total,
            14 * MSECS_PER_HOUR + 30 * 60_000
        );
    }

    #[test]
    fn session_end_resolves_the_next_session() {
        let pattern = TemporalPattern::fixed(1_000, 2_000, 8 * MSECS_PER_HOUR, "t");
        let spec = ScheduleSpec::default().with_intervals(vec![pattern]);
        let mut machine = ScheduleMachine::new(spec, quiet());
        run(&mut machine, at(8, 0, 0), 200);

        assert!(!machine.state().in_session);
        machine.tick(at(8, 0, 3));
        let next = machine.state().next_session.expect("next session");
        assert_eq!(next.left, crate::time::MSECS_PER_DAY - 3_000);
        assert_eq!(machine.state().event_kind, EventKind::Interval);
    }

    #[test]
    fn out_of_range_interval_never_panics_a_tick() {
        let window: TemporalPattern = serde_json::from_str(
            r#"{"start_offset_ms": 9223372036854775807, "duration_ms": 3600000}"#,
        )
        .unwrap();
        let spec = ScheduleSpec::new(TemporalPattern::fixed(1_000, MSECS_PER_HOUR_U64, 0, "t"))
            .with_intervals(vec![window]);
        assert!(spec.validate().is_err());

        let mut machine = ScheduleMachine::new(spec, EngineConfig::default());
        let events = run(&mut machine, at(10, 0, 0), 3);
        assert!(!machine.is_finished());
        assert!(triggered(&events).is_empty());
        assert!(matches!(
            events.last(),
            Some(ScheduleEvent::TimeToNextSession { .. })
        ));
    }

    #[test]
    fn overrun_trigger_countdown_is_recomputed_without_firing() {
        let pattern = TemporalPattern::fixed(
            MSECS_PER_HOUR_U64,
            2 * MSECS_PER_HOUR_U64,
            8 * MSECS_PER_HOUR,
            "t",
        );
        let mut machine = ScheduleMachine::new(ScheduleSpec::new(pattern), quiet());
        let start = at(8, 30, 0);
        run(&mut machine, start, 1_000);
        assert_eq!(machine.state().next_trigger.expect("trigger").left, 1_790_000);

        // the wall clock jumps 40 minutes, far past the pending 09:00 trigger
        let jump = Duration::minutes(40);
        let events = machine.tick(start + Duration::milliseconds(10_000) + jump);
        assert!(triggered(&events).is_empty());
        assert!(machine.state().in_session);
        assert_eq!(machine.state().next_trigger, None);

        // next tick recomputes the countdown to the 10:00 step boundary
        let events = machine.tick(start + Duration::milliseconds(10_010) + jump);
        assert!(triggered(&events).is_empty());
        let trigger = machine.state().next_trigger.expect("recomputed trigger");
        assert_eq!(trigger.left, 2_989_980);
        assert_eq!(trigger.total, MSECS_PER_HOUR);
    }

    #[test]
    fn drift_is_subtracted_from_every_countdown_once() {
        let pattern = TemporalPattern::fixed(
            MSECS_PER_HOUR_U64,
            2 * MSECS_PER_HOUR_U64,
            8 * MSECS_PER_HOUR,
            "t",
        );
        let spec = ScheduleSpec::new(pattern);
        let mut exact = ScheduleMachine::new(spec.clone(), quiet());
        let mut drifting = ScheduleMachine::new(spec, quiet());
        let start = at(8, 30, 0);

        for k in 0..2_100 {
            let now = start + Duration::milliseconds(k * 10);
            let late = if k >= 1_000 { 50 } else { 0 };
            exact.tick(now);
            drifting.tick(now + Duration::milliseconds(late));

            if k == 999 {
                assert_eq!(exact.state().next_trigger, drifting.state().next_trigger);
            }
        }

        let a = exact.state();
        let b = drifting.state();
        assert_eq!(
            a.next_trigger.unwrap().left - b.next_trigger.unwrap().left,
            50
        );
        assert_eq!(a.time_left.unwrap().left - b.time_left.unwrap().left, 50);
        assert_eq!(
            a.next_session.unwrap().left - b.next_session.unwrap().left,
            50
        );
    }
}
