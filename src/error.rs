//! Error types for the tidal scheduler.

/// Top-level error type for pattern math, plan resolution and the registry.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// A temporal pattern violates its type-specific invariant.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The pattern has no session left to offer at this time.
    #[error("no session found")]
    SessionNotFound,

    /// The pattern has no trigger left to offer at this time.
    #[error("no trigger found")]
    TriggerNotFound,

    /// No level of the plan hierarchy yields a future session.
    #[error("No future sessions found")]
    NoFutureSessions,

    /// A schedule spec failed its precondition check.
    #[error("invalid schedule: {0}")]
    InvalidSpec(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Schedule document parse/serialize error.
    #[error("document error: {0}")]
    Document(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ScheduleError>;
