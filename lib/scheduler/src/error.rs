//! Error types for the scheduler crate.

use flowbot_core::WorkflowRunId;
use std::fmt;

/// Errors from schedule parsing and evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
    /// Invalid timezone name.
    InvalidTimezone { timezone: String },
    /// Schedule evaluation failed.
    EvaluationFailed { reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTimezone { timezone } => {
                write!(f, "invalid timezone: {timezone}")
            }
            Self::EvaluationFailed { reason } => {
                write!(f, "schedule evaluation failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from the suspended-run store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeError {
    /// No parked run with this id.
    NotFound { run_id: WorkflowRunId },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for ResumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { run_id } => write!(f, "parked run not found: {run_id}"),
            Self::StorageFailed { reason } => {
                write!(f, "resume storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ResumeError {}
