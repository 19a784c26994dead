// Error taxonomy shared by every layer
use thiserror::Error;

/// Schedule definition or lookup failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown working mode: {0}")]
    UnknownWorkingMode(String),

    #[error("schedule defines no working modes")]
    EmptySchedule,

    #[error("working mode {0} defines no shifts")]
    EmptyMode(String),

    #[error("utc offset of {0} minutes is out of range")]
    InvalidOffset(i32),

    #[error("default working mode {0} is not defined")]
    MissingDefault(String),

    #[error("shift {mode}/{shift}: {reason}")]
    InvalidShift {
        mode: String,
        shift: String,
        reason: String,
    },

    #[error("shifts {first} and {second} of mode {mode} overlap at {hour}:00")]
    OverlappingShifts {
        mode: String,
        first: String,
        second: String,
        hour: u32,
    },

    #[error("break {mode}/{id}: {reason}")]
    InvalidBreak {
        mode: String,
        id: String,
        reason: String,
    },
}

/// Failures of the per-unit duplex channel to the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to open channel: {0}")]
    Connect(String),

    #[error("failed to send request: {0}")]
    Send(String),

    #[error("channel closed uncleanly")]
    UncleanClose,

    #[error("gave up after {0} reconnect attempts")]
    Exhausted(u32),

    #[error("request failed: {0}")]
    Http(String),
}

/// A backend response that could not be normalized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response has no recognizable payload shape")]
    UnknownShape,
}

/// Missing or invalid navigation parameters; fatal for the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("at least one unit must be selected")]
    NoUnits,

    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("invalid instant for {field}: {value}")]
    InvalidInstant { field: &'static str, value: String },

    #[error("window start must be before its end")]
    EmptyWindow,

    #[error("{field} is older than the {days}-day retention limit")]
    BeyondRetention { field: &'static str, days: i64 },
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),
}
