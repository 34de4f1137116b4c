//! Parking and resuming suspended runs.
//!
//! A run that suspends (loop delay, scheduled wait) serializes to a
//! [`SuspendedRun`]; the store keeps it until its resume time arrives,
//! including across process restarts when backed by durable storage.

use crate::error::ResumeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowbot_core::WorkflowRunId;
use flowbot_workflow::SuspendedRun;
use tokio::sync::Mutex;
use tracing::debug;

/// Storage for parked runs.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    /// Parks a suspended run until its resume time.
    async fn park(&self, suspended: SuspendedRun) -> Result<(), ResumeError>;

    /// Removes and returns every parked run whose resume time has
    /// arrived.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<SuspendedRun>, ResumeError>;

    /// Drops a parked run, for cancellation.
    async fn remove(&self, run_id: WorkflowRunId) -> Result<SuspendedRun, ResumeError>;
}

/// An in-process store backed by a mutexed list.
#[derive(Debug, Default)]
pub struct InMemoryResumeStore {
    parked: Mutex<Vec<SuspendedRun>>,
}

impl InMemoryResumeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.parked.lock().await.len()
    }
}

#[async_trait]
impl ResumeStore for InMemoryResumeStore {
    async fn park(&self, suspended: SuspendedRun) -> Result<(), ResumeError> {
        debug!(run_id = %suspended.run_id, resume_at = %suspended.resume_at, "run parked");
        self.parked.lock().await.push(suspended);
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<SuspendedRun>, ResumeError> {
        let mut parked = self.parked.lock().await;
        let mut due = Vec::new();
        let mut i = 0;
        while i < parked.len() {
            if parked[i].resume_at <= now {
                due.push(parked.remove(i));
            } else {
                i += 1;
            }
        }
        Ok(due)
    }

    async fn remove(&self, run_id: WorkflowRunId) -> Result<SuspendedRun, ResumeError> {
        let mut parked = self.parked.lock().await;
        let position = parked
            .iter()
            .position(|s| s.run_id == run_id)
            .ok_or(ResumeError::NotFound { run_id })?;
        Ok(parked.remove(position))
    }
}
