use thiserror::Error;

/// Operation refused because the stopwatch is in the wrong state. Nothing was changed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("The stopwatch is already running")]
    AlreadyRunning,
    #[error("The stopwatch is not running")]
    NotRunning,
    #[error("Nothing to lap, the stopwatch shows zero")]
    NothingToLap,
}

/// Input rejected before anything was written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task name can't be empty")]
    EmptyName,
    #[error("Target time must be greater than zero")]
    NonPositiveTarget,
    #[error("A task named \"{0}\" already exists")]
    DuplicateName(String),
    #[error("Daily goal must be greater than zero")]
    NonPositiveGoal,
    #[error("There is no task {0}")]
    UnknownTask(String),
    #[error("There is no session {0}")]
    UnknownSession(String),
}
