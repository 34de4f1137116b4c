//! Scheduled-run bookkeeping and the timer-driven evaluator.
//!
//! Each scheduled trigger of an active workflow gets a pending
//! [`ScheduledRun`] for its next fire time. A host loop polls
//! [`ScheduleEvaluator::due_runs`], fires the engine for each one with a
//! `TriggerEvent::Schedule`, and calls [`ScheduleEvaluator::advance`] to
//! book the next occurrence.

use crate::error::ScheduleError;
use crate::schedule::ScheduleSpec;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowbot_core::{TriggerId, WorkflowId};
use flowbot_workflow::NodeId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use ulid::Ulid;

/// Unique identifier for one booked occurrence of a scheduled trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduledRunId(Ulid);

impl ScheduledRunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ScheduledRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScheduledRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sched_{}", self.0)
    }
}

/// Status of a booked occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledRunStatus {
    /// Waiting for its fire time.
    Pending,
    /// Handed to the engine.
    Running,
    /// The run completed.
    Completed,
    /// The run aborted.
    Failed,
    /// Missed and skipped under [`MissedRunPolicy::Skip`].
    Skipped,
}

/// What to do with an occurrence whose fire time passed while the
/// process was down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedRunPolicy {
    /// Drop the missed occurrence and book the next one.
    #[default]
    Skip,
    /// Fire the missed occurrence immediately on startup.
    RunImmediately,
}

/// One booked occurrence of a scheduled trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRun {
    pub id: ScheduledRunId,
    pub trigger_id: TriggerId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduledRunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScheduledRun {
    #[must_use]
    pub fn new(
        trigger_id: TriggerId,
        workflow_id: WorkflowId,
        node_id: NodeId,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ScheduledRunId::new(),
            trigger_id,
            workflow_id,
            node_id,
            scheduled_for,
            status: ScheduledRunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the fire time has arrived.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduledRunStatus::Pending && now >= self.scheduled_for
    }

    /// Whether the occurrence was missed by more than the threshold.
    #[must_use]
    pub fn is_missed(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == ScheduledRunStatus::Pending && now > self.scheduled_for + threshold
    }

    pub fn start(&mut self) {
        self.status = ScheduledRunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = ScheduledRunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = ScheduledRunStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn skip(&mut self) {
        self.status = ScheduledRunStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }
}

/// Books and surfaces scheduled occurrences.
#[async_trait]
pub trait ScheduleEvaluator: Send + Sync {
    /// Books the first occurrence of a trigger after `now`.
    async fn book(
        &self,
        trigger_id: TriggerId,
        workflow_id: WorkflowId,
        node_id: NodeId,
        spec: &ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledRun>, ScheduleError>;

    /// Pending occurrences whose fire time has arrived, marked running.
    async fn due_runs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRun>, ScheduleError>;

    /// Finishes an occurrence and books the next one, if any.
    async fn advance(
        &self,
        run: ScheduledRun,
        succeeded: bool,
        spec: &ScheduleSpec,
    ) -> Result<Option<ScheduledRun>, ScheduleError>;

    /// Applies the missed-run policy to stale pending occurrences.
    async fn handle_missed(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        policy: MissedRunPolicy,
    ) -> Result<Vec<ScheduledRun>, ScheduleError>;
}

/// An in-process evaluator backed by a mutexed list. Hosts with durable
/// storage implement [`ScheduleEvaluator`] over their own tables.
#[derive(Debug, Default)]
pub struct InMemoryScheduleEvaluator {
    runs: Mutex<Vec<ScheduledRun>>,
}

impl InMemoryScheduleEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every tracked occurrence, for inspection.
    pub async fn all(&self) -> Vec<ScheduledRun> {
        self.runs.lock().await.clone()
    }
}

#[async_trait]
impl ScheduleEvaluator for InMemoryScheduleEvaluator {
    async fn book(
        &self,
        trigger_id: TriggerId,
        workflow_id: WorkflowId,
        node_id: NodeId,
        spec: &ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledRun>, ScheduleError> {
        let Some(fire_at) = spec.next_after(now) else {
            return Ok(None);
        };
        let run = ScheduledRun::new(trigger_id, workflow_id, node_id, fire_at);
        debug!(id = %run.id, %workflow_id, fire_at = %fire_at, "occurrence booked");
        self.runs.lock().await.push(run.clone());
        Ok(Some(run))
    }

    async fn due_runs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRun>, ScheduleError> {
        let mut runs = self.runs.lock().await;
        let mut due = Vec::new();
        for run in runs.iter_mut() {
            if run.is_due(now) {
                run.start();
                due.push(run.clone());
            }
        }
        Ok(due)
    }

    async fn advance(
        &self,
        run: ScheduledRun,
        succeeded: bool,
        spec: &ScheduleSpec,
    ) -> Result<Option<ScheduledRun>, ScheduleError> {
        {
            let mut runs = self.runs.lock().await;
            if let Some(stored) = runs.iter_mut().find(|r| r.id == run.id) {
                if succeeded {
                    stored.complete();
                } else {
                    stored.fail();
                }
            }
        }
        self.book(
            run.trigger_id,
            run.workflow_id,
            run.node_id,
            spec,
            run.scheduled_for,
        )
        .await
    }

    async fn handle_missed(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        policy: MissedRunPolicy,
    ) -> Result<Vec<ScheduledRun>, ScheduleError> {
        let mut runs = self.runs.lock().await;
        let mut to_fire = Vec::new();
        for run in runs.iter_mut() {
            if !run.is_missed(now, threshold) {
                continue;
            }
            match policy {
                MissedRunPolicy::Skip => run.skip(),
                MissedRunPolicy::RunImmediately => {
                    run.start();
                    to_fire.push(run.clone());
                }
            }
        }
        Ok(to_fire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flowbot_workflow::config::{IntervalUnit, ScheduleMode};

    fn two_hour_spec() -> ScheduleSpec {
        ScheduleSpec::from_config(&ScheduleMode::Interval {
            interval_value: 2,
            interval_unit: IntervalUnit::Hours,
        })
        .expect("parses")
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn booked_run_becomes_due_at_fire_time() {
        let evaluator = InMemoryScheduleEvaluator::new();
        let booked = evaluator
            .book(
                TriggerId::new(),
                WorkflowId::new(),
                NodeId::new(1),
                &two_hour_spec(),
                at(9, 0),
            )
            .await
            .expect("books")
            .expect("interval always has a next");
        assert_eq!(booked.scheduled_for, at(11, 0));

        assert!(evaluator.due_runs(at(10, 0)).await.expect("due").is_empty());
        let due = evaluator.due_runs(at(11, 0)).await.expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, booked.id);

        // Marked running; a second poll does not return it again.
        assert!(evaluator.due_runs(at(11, 1)).await.expect("due").is_empty());
    }

    #[tokio::test]
    async fn advance_books_the_next_occurrence() {
        let evaluator = InMemoryScheduleEvaluator::new();
        let spec = two_hour_spec();
        let first = evaluator
            .book(
                TriggerId::new(),
                WorkflowId::new(),
                NodeId::new(1),
                &spec,
                at(9, 0),
            )
            .await
            .expect("books")
            .expect("booked");
        let next = evaluator
            .advance(first.clone(), true, &spec)
            .await
            .expect("advances")
            .expect("interval continues");
        assert_eq!(next.scheduled_for, at(13, 0));

        let all = evaluator.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, ScheduledRunStatus::Completed);
        assert_eq!(all[1].status, ScheduledRunStatus::Pending);
    }

    #[tokio::test]
    async fn missed_runs_follow_policy() {
        let evaluator = InMemoryScheduleEvaluator::new();
        let spec = two_hour_spec();
        evaluator
            .book(
                TriggerId::new(),
                WorkflowId::new(),
                NodeId::new(1),
                &spec,
                at(1, 0),
            )
            .await
            .expect("books");

        // Fire time 03:00, now 09:00, one hour of slack: well missed.
        let skipped = evaluator
            .handle_missed(at(9, 0), Duration::hours(1), MissedRunPolicy::Skip)
            .await
            .expect("handled");
        assert!(skipped.is_empty());
        assert_eq!(evaluator.all().await[0].status, ScheduledRunStatus::Skipped);

        evaluator
            .book(
                TriggerId::new(),
                WorkflowId::new(),
                NodeId::new(2),
                &spec,
                at(1, 0),
            )
            .await
            .expect("books");
        let fired = evaluator
            .handle_missed(at(9, 0), Duration::hours(1), MissedRunPolicy::RunImmediately)
            .await
            .expect("handled");
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].node_id, NodeId::new(2));
    }

    #[tokio::test]
    async fn once_schedule_does_not_rebook() {
        let evaluator = InMemoryScheduleEvaluator::new();
        let fire = at(10, 0);
        let spec = ScheduleSpec::from_config(&ScheduleMode::Once { at: fire }).expect("parses");
        let run = evaluator
            .book(
                TriggerId::new(),
                WorkflowId::new(),
                NodeId::new(1),
                &spec,
                at(9, 0),
            )
            .await
            .expect("books")
            .expect("booked");
        let next = evaluator.advance(run, true, &spec).await.expect("advances");
        assert!(next.is_none());
    }
}
