//! Run history records.
//!
//! The engine itself keeps no state between calls; hosts that want an
//! audit trail keep one [`RunRecord`] per run and update it from the
//! engine's outcome.

use crate::engine::{RunOutcome, RunStatus};
use crate::error::RunError;
use chrono::{DateTime, Utc};
use flowbot_core::{WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted but not yet handed to the engine.
    Queued,
    /// Currently executing.
    Running,
    /// Parked on a suspension; will resume later.
    Suspended,
    /// Terminated normally.
    Completed,
    /// Aborted with an error.
    Failed,
}

impl RunState {
    /// Whether the run will never execute again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// An audit record for one run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub state: RunState,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// The aborting error, for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    /// Warnings accumulated across all segments of the run.
    #[serde(default)]
    pub warning_count: usize,
}

impl RunRecord {
    /// Creates a queued record for a run the host is about to drive.
    #[must_use]
    pub fn queued(run_id: WorkflowRunId, workflow_id: WorkflowId) -> Self {
        Self {
            run_id,
            workflow_id,
            state: RunState::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            warning_count: 0,
        }
    }

    pub fn start(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Folds one engine outcome into the record. A suspended outcome
    /// leaves the run open; resuming later folds another outcome in.
    pub fn apply_outcome(&mut self, outcome: &RunOutcome) {
        self.warning_count += outcome.warnings.len();
        match &outcome.status {
            RunStatus::Completed { .. } => {
                self.state = RunState::Completed;
                self.finished_at = Some(Utc::now());
            }
            RunStatus::Suspended { .. } => {
                self.state = RunState::Suspended;
            }
            RunStatus::Aborted { error } => {
                self.state = RunState::Failed;
                self.error = Some(error.clone());
                self.finished_at = Some(Utc::now());
            }
        }
    }

    /// A finished record built from a single-segment run, for hosts that
    /// do not track the queued phase.
    #[must_use]
    pub fn from_outcome(workflow_id: WorkflowId, outcome: &RunOutcome) -> Self {
        let mut record = Self::queued(outcome.run_id, workflow_id);
        record.start();
        record.apply_outcome(outcome);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::engine::SuspendedRun;
    use crate::event::TriggerEvent;
    use crate::node::NodeId;
    use crate::registry::TerminationKind;

    fn outcome(run_id: WorkflowRunId, status: RunStatus) -> RunOutcome {
        RunOutcome {
            run_id,
            status,
            effects: Vec::new(),
            warnings: Vec::new(),
            context: RunContext::new(),
        }
    }

    #[test]
    fn completed_run_is_terminal() {
        let run_id = WorkflowRunId::new();
        let workflow_id = WorkflowId::new();
        let mut record = RunRecord::queued(run_id, workflow_id);
        assert_eq!(record.state, RunState::Queued);

        record.start();
        assert_eq!(record.state, RunState::Running);
        assert!(record.started_at.is_some());

        record.apply_outcome(&outcome(
            run_id,
            RunStatus::Completed {
                kind: TerminationKind::Stop,
            },
        ));
        assert_eq!(record.state, RunState::Completed);
        assert!(record.state.is_terminal());
        assert!(record.finished_at.is_some());
        assert!(record.error.is_none());
    }

    #[test]
    fn suspension_keeps_the_run_open() {
        let run_id = WorkflowRunId::new();
        let workflow_id = WorkflowId::new();
        let mut record = RunRecord::queued(run_id, workflow_id);
        record.start();

        let suspended = SuspendedRun {
            run_id,
            workflow_id,
            node_id: NodeId::new(2),
            context: RunContext::new(),
            resume_at: Utc::now(),
            event: TriggerEvent::Schedule {
                fired_at: Utc::now(),
            },
            seed: 1,
        };
        record.apply_outcome(&outcome(run_id, RunStatus::Suspended { suspended }));
        assert_eq!(record.state, RunState::Suspended);
        assert!(!record.state.is_terminal());
        assert!(record.finished_at.is_none());

        record.apply_outcome(&outcome(
            run_id,
            RunStatus::Completed {
                kind: TerminationKind::Stop,
            },
        ));
        assert_eq!(record.state, RunState::Completed);
    }

    #[test]
    fn aborted_run_keeps_its_error() {
        let run_id = WorkflowRunId::new();
        let record = RunRecord::from_outcome(
            WorkflowId::new(),
            &outcome(
                run_id,
                RunStatus::Aborted {
                    error: RunError::Timeout,
                },
            ),
        );
        assert_eq!(record.state, RunState::Failed);
        assert_eq!(record.error, Some(RunError::Timeout));
    }
}
