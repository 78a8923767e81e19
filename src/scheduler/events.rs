//! Notifications emitted by schedules.

/// Caller-chosen schedule identifier.
pub type ScheduleId = i64;

/// Something a schedule reports to its consumer.
///
/// Millisecond fields carry the remaining time and the total of the
/// countdown they belong to, so a consumer can draw progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEvent {
    Started,
    Stopped,
    Paused,
    /// A pattern fired.
    Triggered { task: String },
    /// Waiting for the next session. `label` names the kind of session.
    TimeToNextSession {
        ms_left: i64,
        ms_total: i64,
        label: &'static str,
    },
    /// Inside a session, waiting for the next trigger.
    TimeToNextTrigger { ms_left: i64, ms_total: i64 },
    /// Inside a session, time until it closes.
    TimeLeftInSession { ms_left: i64, ms_total: i64 },
    /// The schedule will never fire again and has been unregistered.
    Finished { reason: String },
}

impl ScheduleEvent {
    /// Progress events are suppressed when `emit_progress` is off.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            Self::TimeToNextSession { .. }
                | Self::TimeToNextTrigger { .. }
                | Self::TimeLeftInSession { .. }
        )
    }
}

/// A [`ScheduleEvent`] tagged with the schedule that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub id: ScheduleId,
    pub event: ScheduleEvent,
}
