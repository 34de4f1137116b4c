//! Timers and suspensions for the workflow engine.
//!
//! This crate provides:
//!
//! - **Schedules**: parsing scheduled-trigger configs into evaluatable
//!   interval/cron/once specs and computing fire times
//! - **Scheduled runs**: bookkeeping for booked occurrences, including
//!   missed-run handling after downtime
//! - **Resume store**: parking suspended runs until their delay elapses

pub mod error;
pub mod manager;
pub mod resume;
pub mod schedule;

pub use error::{ResumeError, ScheduleError};
pub use manager::{
    InMemoryScheduleEvaluator, MissedRunPolicy, ScheduleEvaluator, ScheduledRun, ScheduledRunId,
    ScheduledRunStatus,
};
pub use resume::{InMemoryResumeStore, ResumeStore};
pub use schedule::ScheduleSpec;
