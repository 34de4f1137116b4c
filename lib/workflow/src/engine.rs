//! The execution engine: drives a run from trigger to termination.
//!
//! The engine performs no I/O. Side effects come back as
//! [`EffectRequest`]s on the outcome, suspensions come back as a
//! serializable [`SuspendedRun`] the host can park and later feed to
//! [`Engine::resume`].

use crate::context::RunContext;
use crate::definition::{Workflow, WorkflowState};
use crate::effect::EffectRequest;
use crate::error::{RunError, RunWarning};
use crate::event::TriggerEvent;
use crate::graph::FlowGraph;
use crate::node::NodeId;
use crate::registry::{self, Evaluation, TerminationKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flowbot_core::{WorkflowId, WorkflowRunId};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Wall-clock budget for a single run segment.
    pub max_run_duration: Duration,
    /// Fixed RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_run_duration: Duration::from_secs(30),
            seed: None,
        }
    }
}

/// Cooperative cancellation handle, checked between node evaluations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Terminal (or parked) state of a run segment.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed { kind: TerminationKind },
    Suspended { suspended: SuspendedRun },
    Aborted { error: RunError },
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: WorkflowRunId,
    pub status: RunStatus,
    pub effects: Vec<EffectRequest>,
    pub warnings: Vec<RunWarning>,
    pub context: RunContext,
}

impl RunOutcome {
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self.status, RunStatus::Suspended { .. })
    }
}

/// Everything needed to resume a parked run, including across process
/// restarts. The RNG seed rides along so random choices stay reproducible
/// over a suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendedRun {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub context: RunContext,
    pub resume_at: DateTime<Utc>,
    pub event: TriggerEvent,
    pub seed: u64,
}

/// The workflow execution engine.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    options: EngineOptions,
}

impl Engine {
    #[must_use]
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    /// Runs a workflow from its trigger node.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is not active or has no usable
    /// trigger node.
    pub fn run(&self, workflow: &Workflow, event: TriggerEvent) -> Result<RunOutcome, RunError> {
        self.run_with_cancel(workflow, event, &CancelFlag::new())
    }

    /// Runs a workflow with a cancellation handle. Cancellation takes
    /// effect between node evaluations only.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is not active or has no usable
    /// trigger node.
    pub fn run_with_cancel(
        &self,
        workflow: &Workflow,
        event: TriggerEvent,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome, RunError> {
        if workflow.state() != WorkflowState::Active {
            return Err(RunError::NotActive {
                workflow_id: workflow.id(),
            });
        }
        let graph = workflow.graph();
        let trigger = graph.trigger().ok_or(RunError::NotActive {
            workflow_id: workflow.id(),
        })?;
        let run_id = WorkflowRunId::new();
        let seed = self.options.seed.unwrap_or_else(|| rand::rngs::OsRng.next_u64());
        debug!(%run_id, workflow_id = %workflow.id(), trigger = %trigger.id, "starting run");
        self.drive(
            &graph,
            workflow.id(),
            run_id,
            trigger.id,
            RunContext::new(),
            event,
            seed,
            false,
            cancel,
        )
    }

    /// Resumes a parked run at its stored node with its stored context.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is no longer active.
    pub fn resume(
        &self,
        workflow: &Workflow,
        suspended: SuspendedRun,
    ) -> Result<RunOutcome, RunError> {
        self.resume_with_cancel(workflow, suspended, &CancelFlag::new())
    }

    /// Resumes with a cancellation handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is no longer active.
    pub fn resume_with_cancel(
        &self,
        workflow: &Workflow,
        suspended: SuspendedRun,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome, RunError> {
        if workflow.state() != WorkflowState::Active {
            return Err(RunError::NotActive {
                workflow_id: workflow.id(),
            });
        }
        let graph = workflow.graph();
        debug!(run_id = %suspended.run_id, node = %suspended.node_id, "resuming run");
        self.drive(
            &graph,
            suspended.workflow_id,
            suspended.run_id,
            suspended.node_id,
            suspended.context,
            suspended.event,
            suspended.seed,
            true,
            cancel,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn drive(
        &self,
        graph: &FlowGraph,
        workflow_id: WorkflowId,
        run_id: WorkflowRunId,
        start: NodeId,
        mut ctx: RunContext,
        event: TriggerEvent,
        seed: u64,
        resuming: bool,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome, RunError> {
        let deadline = Instant::now() + self.options.max_run_duration;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut effects = Vec::new();
        let mut current = start;
        // Only the very first node of a resumed segment counts as resumed.
        let mut first = true;

        let status = loop {
            if cancel.is_cancelled() {
                warn!(%run_id, node = %current, "run cancelled");
                break RunStatus::Aborted {
                    error: RunError::Cancelled,
                };
            }
            if Instant::now() >= deadline {
                warn!(%run_id, node = %current, "run exceeded wall-clock budget");
                break RunStatus::Aborted {
                    error: RunError::Timeout,
                };
            }
            let Some(node) = graph.node(current) else {
                break RunStatus::Aborted {
                    error: RunError::MissingNode { node_id: current },
                };
            };
            // The evaluation boundary is also the idempotent-resume
            // boundary: a resume re-enters the node without re-counting
            // the visit.
            let resumed_from_delay = first && resuming && ctx.take_pending_delay(current);
            if !resumed_from_delay {
                ctx.record_visit(current);
            }
            first = false;

            let evaluation = registry::evaluate(
                node,
                &mut ctx,
                &event,
                Utc::now(),
                &mut rng,
                resumed_from_delay,
                &mut effects,
            );
            match evaluation {
                Evaluation::Continue(label) => match node.target(label) {
                    Some(next) => {
                        debug!(%run_id, node = %current, %label, next = %next, "edge followed");
                        current = next;
                    }
                    // An unconnected edge is a terminal in that direction.
                    None => break RunStatus::Completed {
                        kind: TerminationKind::Stop,
                    },
                },
                Evaluation::Terminate(kind) => break RunStatus::Completed { kind },
                Evaluation::Suspend { resume_after } => {
                    let resume_at = Utc::now()
                        + ChronoDuration::from_std(resume_after)
                            .unwrap_or_else(|_| ChronoDuration::seconds(0));
                    // Reseed so the parked run replays the RNG stream it
                    // would have continued with.
                    let next_seed = rng.next_u64();
                    break RunStatus::Suspended {
                        suspended: SuspendedRun {
                            run_id,
                            workflow_id,
                            node_id: current,
                            context: ctx.clone(),
                            resume_at,
                            event: event.clone(),
                            seed: next_seed,
                        },
                    };
                }
            }
        };

        let warnings = ctx.warnings().to_vec();
        Ok(RunOutcome {
            run_id,
            status,
            effects,
            warnings,
            context: ctx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ConditionConfig, ConditionField, ConditionOperator, EndFlowConfig, KeywordConfig,
        LoopConfig, LoopType, NodeConfig,
    };
    use crate::context::VarValue;
    use crate::event::{Channel, MessageEvent};
    use crate::node::{EdgeLabel, WorkflowNode};
    use flowbot_core::ChannelAccountId;

    fn message_event(text: &str) -> TriggerEvent {
        TriggerEvent::Message(MessageEvent {
            channel: Channel::Whatsapp,
            account_id: ChannelAccountId::new(),
            sender_id: "+33612345678".to_string(),
            sender_name: None,
            text: text.to_string(),
            contact_tags: Vec::new(),
            first_contact: false,
            sentiment: None,
        })
    }

    fn keyword_workflow() -> Workflow {
        let nodes = vec![
            WorkflowNode::new(
                NodeId::new(1),
                "Devis",
                NodeConfig::Keyword(KeywordConfig {
                    keywords: "devis\nprix".to_string(),
                }),
            )
            .with_target(EdgeLabel::Default, NodeId::new(2)),
            WorkflowNode::new(
                NodeId::new(2),
                "Urgent?",
                NodeConfig::Condition(ConditionConfig {
                    field: ConditionField::Message,
                    operator: ConditionOperator::Contains,
                    value: "urgent".to_string(),
                }),
            )
            .with_target(EdgeLabel::True, NodeId::new(3))
            .with_target(EdgeLabel::False, NodeId::new(4)),
            WorkflowNode::new(
                NodeId::new(3),
                "High priority",
                NodeConfig::EndFlow(EndFlowConfig::Message {
                    message: "Priorité haute".to_string(),
                }),
            ),
            WorkflowNode::new(
                NodeId::new(4),
                "Done",
                NodeConfig::EndFlow(EndFlowConfig::Stop),
            ),
        ];
        let mut workflow = Workflow::new("Devis urgent", nodes);
        workflow.activate().expect("workflow is valid");
        workflow
    }

    fn engine() -> Engine {
        Engine::new(EngineOptions {
            max_run_duration: Duration::from_secs(5),
            seed: Some(1),
        })
    }

    #[test]
    fn keyword_scenario_takes_true_edge() {
        let workflow = keyword_workflow();
        let outcome = engine()
            .run(&workflow, message_event("j'ai besoin d'un devis urgent"))
            .expect("run starts");
        assert_eq!(
            outcome.status,
            RunStatus::Completed {
                kind: TerminationKind::Message
            }
        );
        assert_eq!(outcome.effects.len(), 1);
        match &outcome.effects[0] {
            EffectRequest::SendMessage { text, .. } => assert_eq!(text, "Priorité haute"),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn false_edge_produces_no_effects() {
        let workflow = keyword_workflow();
        let outcome = engine()
            .run(&workflow, message_event("un devis s'il vous plaît"))
            .expect("run starts");
        assert_eq!(
            outcome.status,
            RunStatus::Completed {
                kind: TerminationKind::Stop
            }
        );
        assert!(outcome.effects.is_empty());
    }

    #[test]
    fn draft_workflow_refuses_to_run() {
        let nodes = keyword_workflow().nodes().to_vec();
        let workflow = Workflow::new("Draft", nodes);
        let result = engine().run(&workflow, message_event("devis"));
        assert!(matches!(result, Err(RunError::NotActive { .. })));
    }

    #[test]
    fn consecutive_runs_have_independent_contexts() {
        let workflow = keyword_workflow();
        let eng = engine();
        let first = eng
            .run(&workflow, message_event("devis urgent"))
            .expect("first run");
        let second = eng.run(&workflow, message_event("devis")).expect("second run");
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.context.variables().len(), 0);
    }

    #[test]
    fn unconnected_edge_terminates_the_run() {
        let nodes = vec![
            WorkflowNode::new(
                NodeId::new(1),
                "Trigger",
                NodeConfig::Keyword(KeywordConfig {
                    keywords: "go".to_string(),
                }),
            ),
            // Default slot left unconnected: the run ends after the trigger.
        ];
        let mut workflow = Workflow::new("Terminal trigger", nodes);
        workflow.activate().expect("valid");
        let outcome = engine().run(&workflow, message_event("go")).expect("run");
        assert_eq!(
            outcome.status,
            RunStatus::Completed {
                kind: TerminationKind::Stop
            }
        );
    }

    fn delayed_loop_workflow() -> Workflow {
        let nodes = vec![
            WorkflowNode::new(
                NodeId::new(1),
                "Trigger",
                NodeConfig::Keyword(KeywordConfig {
                    keywords: "go".to_string(),
                }),
            )
            .with_target(EdgeLabel::Default, NodeId::new(2)),
            WorkflowNode::new(
                NodeId::new(2),
                "Loop",
                NodeConfig::Loop(LoopConfig {
                    loop_type: LoopType::Count { count: 2 },
                    delay_between: 60,
                    max_iterations: 100,
                }),
            )
            .with_target(EdgeLabel::True, NodeId::new(3))
            .with_target(EdgeLabel::False, NodeId::new(4)),
            WorkflowNode::new(
                NodeId::new(3),
                "Body",
                NodeConfig::SetVariable(crate::config::SetVariableConfig {
                    assignments: vec![crate::config::Assignment {
                        name: "ticks".to_string(),
                        source: crate::config::AssignmentSource::Expression {
                            expression: "ticks + 1".to_string(),
                        },
                    }],
                }),
            )
            .with_target(EdgeLabel::Default, NodeId::new(2)),
            WorkflowNode::new(
                NodeId::new(4),
                "Done",
                NodeConfig::EndFlow(EndFlowConfig::Stop),
            ),
        ];
        let mut workflow = Workflow::new("Delayed loop", nodes);
        workflow.activate().expect("valid");
        workflow
    }

    #[test]
    fn loop_delay_suspends_and_resumes_to_completion() {
        let workflow = delayed_loop_workflow();
        let eng = engine();
        let outcome = eng
            .run(&workflow, message_event("go"))
            .expect("run starts");
        let RunStatus::Suspended { suspended } = outcome.status else {
            panic!("expected a suspension, got {:?}", outcome.status);
        };
        assert_eq!(suspended.node_id, NodeId::new(2));

        let resumed = eng.resume(&workflow, suspended).expect("resume");
        assert_eq!(
            resumed.status,
            RunStatus::Completed {
                kind: TerminationKind::Stop
            }
        );
        // Both loop iterations ran the body exactly once each.
        assert_eq!(
            resumed.context.get("ticks").map(VarValue::render),
            Some("2".to_string())
        );
        assert!(resumed.warnings.is_empty());
    }

    #[test]
    fn suspended_run_round_trips_through_json() {
        let workflow = delayed_loop_workflow();
        let outcome = engine()
            .run(&workflow, message_event("go"))
            .expect("run starts");
        let RunStatus::Suspended { suspended } = outcome.status else {
            panic!("expected a suspension");
        };
        let json = serde_json::to_string(&suspended).expect("serialize");
        let back: SuspendedRun = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(suspended, back);
    }

    #[test]
    fn cancellation_aborts_between_nodes() {
        let workflow = keyword_workflow();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let outcome = engine()
            .run_with_cancel(&workflow, message_event("devis"), &cancel)
            .expect("run starts");
        assert_eq!(
            outcome.status,
            RunStatus::Aborted {
                error: RunError::Cancelled
            }
        );
        assert!(outcome.effects.is_empty());
    }
}
