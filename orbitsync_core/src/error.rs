//! Error types for the orbitsync core.
//!
//! Each failure class maps to one enum so callers can decide what is fatal:
//! configuration problems stop an instance from serving, persistence
//! problems degrade to defaults, computation problems are returned to the
//! caller of a single query.

use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Invalid static configuration, rejected at load time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Body name must not be empty")]
    EmptyBodyName,

    #[error("Duplicate body name: {0}")]
    DuplicateBody(String),

    #[error("Body '{name}': period must be positive and finite, got {period}")]
    NonPositivePeriod { name: String, period: f64 },

    #[error("Body '{name}': direction must be +1 or -1, got {direction}")]
    InvalidDirection { name: String, direction: i32 },

    #[error("Body '{name}': initial offset must be finite")]
    NonFiniteOffset { name: String },

    #[error("Body '{name}': unknown orbital plane '{plane}'")]
    UnknownPlane { name: String, plane: String },

    #[error("Instance name must not be empty")]
    EmptyInstanceName,

    #[error("Invalid initial scale: {0}")]
    InvalidScale(f64),

    #[error("Peer timeout must be greater than zero")]
    ZeroPeerTimeout,

    #[error("Failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Snapshot storage failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

/// A query could not be evaluated for the given simulated time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Simulated seconds must be finite, got {0}")]
    NonFiniteSeconds(f64),

    #[error("Simulated time {0}s is outside the representable calendar range")]
    OutOfRange(f64),
}

/// Rejected clock mutations. The clock state is untouched when these occur.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClockError {
    #[error("Scale must be finite and non-negative, got {0}")]
    InvalidScale(f64),

    #[error(transparent)]
    Computation(#[from] ComputationError),
}

/// Failures of commands and queries issued to a running instance.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Instance is {0}, not running")]
    NotRunning(LifecycleState),

    #[error("Instance cannot start while {0}")]
    CannotStart(LifecycleState),

    #[error("Unknown body: {0}")]
    UnknownBody(String),

    #[error("Shutdown task ended before reporting")]
    ShutdownInterrupted,

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Computation(#[from] ComputationError),
}
