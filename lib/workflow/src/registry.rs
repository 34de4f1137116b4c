//! Node evaluation: the behavior half of the node type registry.
//!
//! [`evaluate`] is total over well-formed configs and performs no I/O.
//! Recoverable problems (failed expressions, missing variables, loop
//! limits) become warnings on the context; the run keeps going.

use crate::config::{
    AssignmentSource, ConditionConfig, ConditionField, ConditionOperator, EndFlowConfig,
    LoopConfig, LoopType, NodeConfig, RandomChoiceConfig, SetVariableConfig,
};
use crate::context::{RunContext, VarValue};
use crate::effect::EffectRequest;
use crate::error::RunWarning;
use crate::event::TriggerEvent;
use crate::expr;
use crate::node::{EdgeLabel, NodeId, WorkflowNode};
use chrono::{DateTime, Utc};
use flowbot_core::WorkflowId;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// How a run terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationKind {
    Stop,
    Message,
    Redirect { workflow_id: WorkflowId },
    Return { value: JsonValue },
}

/// The outcome of evaluating one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Follow the labeled edge to the next node.
    Continue(EdgeLabel),
    /// The run is over.
    Terminate(TerminationKind),
    /// Park the run and resume at this node after the delay.
    Suspend { resume_after: Duration },
}

/// Evaluates a node against the run context and triggering event.
///
/// `resumed_from_delay` is true when the engine is re-entering this node
/// after a loop's between-iteration delay; the pending iteration then
/// proceeds instead of suspending again. Requested side effects are pushed
/// onto `effects`.
pub fn evaluate(
    node: &WorkflowNode,
    ctx: &mut RunContext,
    event: &TriggerEvent,
    now: DateTime<Utc>,
    rng: &mut StdRng,
    resumed_from_delay: bool,
    effects: &mut Vec<EffectRequest>,
) -> Evaluation {
    match &node.config {
        // Triggers already matched before the run started; they just hand
        // control to the next node.
        NodeConfig::Keyword(_)
        | NodeConfig::WhatsappMessage(_)
        | NodeConfig::TelegramMessage(_)
        | NodeConfig::NewContact(_)
        | NodeConfig::Scheduled(_)
        | NodeConfig::WebhookTrigger(_) => Evaluation::Continue(EdgeLabel::Default),
        NodeConfig::Condition(config) => {
            let label = if eval_condition(config, node.id, ctx, event, now) {
                EdgeLabel::True
            } else {
                EdgeLabel::False
            };
            Evaluation::Continue(label)
        }
        NodeConfig::Loop(config) => eval_loop(config, node.id, ctx, event, now, resumed_from_delay),
        NodeConfig::SetVariable(config) => {
            eval_set_variable(config, node.id, ctx);
            Evaluation::Continue(EdgeLabel::Default)
        }
        NodeConfig::RandomChoice(config) => eval_random_choice(config, ctx, rng),
        NodeConfig::EndFlow(config) => eval_end_flow(config, ctx, event, effects),
    }
}

/// Evaluates a condition to its boolean result.
///
/// Numeric comparisons parse both operands as numbers and evaluate to
/// `false` when either fails to parse.
pub fn eval_condition(
    config: &ConditionConfig,
    node_id: NodeId,
    ctx: &mut RunContext,
    event: &TriggerEvent,
    now: DateTime<Utc>,
) -> bool {
    let subject = field_value(&config.field, node_id, ctx, event, now);
    let value = &config.value;
    match config.operator {
        ConditionOperator::Contains => {
            subject.to_lowercase().contains(&value.to_lowercase())
        }
        ConditionOperator::NotContains => {
            !subject.to_lowercase().contains(&value.to_lowercase())
        }
        ConditionOperator::Equals => loose_equals(&subject, value),
        ConditionOperator::NotEquals => !loose_equals(&subject, value),
        ConditionOperator::StartsWith => subject.starts_with(value.as_str()),
        ConditionOperator::EndsWith => subject.ends_with(value.as_str()),
        ConditionOperator::GreaterThan => numeric_cmp(&subject, value).is_some_and(|o| o.is_gt()),
        ConditionOperator::LessThan => numeric_cmp(&subject, value).is_some_and(|o| o.is_lt()),
        ConditionOperator::IsEmpty => subject.is_empty(),
        ConditionOperator::IsNotEmpty => !subject.is_empty(),
        ConditionOperator::MatchesRegex => regex::Regex::new(value)
            .map(|re| re.is_match(&subject))
            .unwrap_or(false),
    }
}

fn field_value(
    field: &ConditionField,
    node_id: NodeId,
    ctx: &mut RunContext,
    event: &TriggerEvent,
    now: DateTime<Utc>,
) -> String {
    let message = event.message();
    match field {
        ConditionField::Message => message.map(|m| m.text.clone()).unwrap_or_default(),
        ConditionField::Sender => message.map(|m| m.sender_id.clone()).unwrap_or_default(),
        ConditionField::ContactName => message
            .and_then(|m| m.sender_name.clone())
            .unwrap_or_default(),
        ConditionField::ContactTag => message
            .map(|m| m.contact_tags.join("\n"))
            .unwrap_or_default(),
        ConditionField::Sentiment => message
            .and_then(|m| m.sentiment.clone())
            .unwrap_or_default(),
        ConditionField::CurrentTime => now.format("%H:%M").to_string(),
        ConditionField::Variable { name } => match ctx.get(name) {
            Some(value) => value.render(),
            None => {
                ctx.warn(RunWarning::MissingVariable {
                    node_id,
                    name: name.clone(),
                });
                String::new()
            }
        },
    }
}

fn loose_equals(a: &str, b: &str) -> bool {
    let numeric = VarValue::Str(a.to_string())
        .as_number()
        .zip(VarValue::Str(b.to_string()).as_number());
    match numeric {
        Some((x, y)) => x == y,
        None => a == b,
    }
}

fn numeric_cmp(a: &str, b: &str) -> Option<std::cmp::Ordering> {
    let x = VarValue::Str(a.to_string()).as_number()?;
    let y = VarValue::Str(b.to_string()).as_number()?;
    x.partial_cmp(&y)
}

fn eval_loop(
    config: &LoopConfig,
    node_id: NodeId,
    ctx: &mut RunContext,
    event: &TriggerEvent,
    now: DateTime<Utc>,
    resumed_from_delay: bool,
) -> Evaluation {
    // The engine records the visit before evaluation, so the first pass
    // through the node sees a count of 1 and zero completed iterations.
    let iterations_done = ctx.visits(node_id).saturating_sub(1);

    let wants_more = match &config.loop_type {
        LoopType::Count { count } => iterations_done < *count,
        LoopType::Array { variable, .. } => {
            let len = match ctx.get(variable) {
                Some(VarValue::List(items)) => items.len(),
                _ => 0,
            };
            (iterations_done as usize) < len
        }
        LoopType::While { condition } => eval_condition(condition, node_id, ctx, event, now),
    };

    if !wants_more {
        return Evaluation::Continue(EdgeLabel::False);
    }
    if iterations_done >= config.max_iterations {
        ctx.warn(RunWarning::LoopLimitExceeded {
            node_id,
            limit: config.max_iterations,
        });
        return Evaluation::Continue(EdgeLabel::False);
    }
    if config.delay_between > 0 && iterations_done > 0 && !resumed_from_delay {
        ctx.set_pending_delay(node_id);
        return Evaluation::Suspend {
            resume_after: Duration::from_secs(config.delay_between),
        };
    }

    if let LoopType::Array {
        variable,
        item_variable,
    } = &config.loop_type
    {
        let item = match ctx.get(variable) {
            Some(VarValue::List(items)) => items.get(iterations_done as usize).cloned(),
            _ => None,
        };
        if let Some(item) = item {
            let item_name = item_variable
                .clone()
                .unwrap_or_else(|| format!("{variable}_item"));
            ctx.set(item_name, item);
            ctx.set(
                format!("{variable}_index"),
                VarValue::Number(f64::from(iterations_done)),
            );
        }
    }

    Evaluation::Continue(EdgeLabel::True)
}

fn eval_set_variable(config: &SetVariableConfig, node_id: NodeId, ctx: &mut RunContext) {
    // Stage every assignment first; apply only if all of them succeed.
    let mut staged: Vec<(String, VarValue)> = Vec::with_capacity(config.assignments.len());
    let mut staged_warnings: Vec<RunWarning> = Vec::new();
    for assignment in &config.assignments {
        let value = match &assignment.source {
            AssignmentSource::Static { value } => VarValue::Str(value.clone()),
            AssignmentSource::Expression { expression } => match expr::run(expression, ctx) {
                Ok(value) => value,
                Err(error) => {
                    ctx.warn(RunWarning::ExpressionFailed {
                        node_id,
                        reason: error.to_string(),
                    });
                    return;
                }
            },
            AssignmentSource::ApiResponse { path } => {
                let response = ctx.last_api_response();
                let resolved = match (response, path) {
                    (Some(body), Some(path)) => body.pointer(&dot_path_to_pointer(path)).cloned(),
                    (Some(body), None) => Some(body.clone()),
                    (None, _) => None,
                };
                match resolved {
                    Some(value) => VarValue::from_json(&value),
                    None => {
                        staged_warnings.push(RunWarning::MissingVariable {
                            node_id,
                            name: format!("api_response{}", path.as_deref().map(|p| format!(".{p}")).unwrap_or_default()),
                        });
                        VarValue::Str(String::new())
                    }
                }
            }
            AssignmentSource::Variable { from } => match ctx.get(from) {
                Some(value) => value.clone(),
                None => {
                    staged_warnings.push(RunWarning::MissingVariable {
                        node_id,
                        name: from.clone(),
                    });
                    VarValue::Str(String::new())
                }
            },
        };
        staged.push((assignment.name.clone(), value));
    }
    for warning in staged_warnings {
        ctx.warn(warning);
    }
    for (name, value) in staged {
        ctx.set(name, value);
    }
}

/// Converts `a.b.0` dot paths to the JSON pointer form `/a/b/0`.
fn dot_path_to_pointer(path: &str) -> String {
    let mut pointer = String::with_capacity(path.len() + 1);
    for segment in path.split('.') {
        pointer.push('/');
        pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    pointer
}

fn eval_random_choice(
    config: &RandomChoiceConfig,
    ctx: &mut RunContext,
    rng: &mut StdRng,
) -> Evaluation {
    let total = config.total_weight().max(1);
    let draw = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    let mut selected = config.choices.len() - 1;
    for (i, choice) in config.choices.iter().enumerate() {
        cumulative += u64::from(config.weight_of(choice));
        if draw < cumulative {
            selected = i;
            break;
        }
    }
    if config.choices.len() == 2 {
        let label = if selected == 0 {
            EdgeLabel::True
        } else {
            EdgeLabel::False
        };
        Evaluation::Continue(label)
    } else {
        ctx.set(
            "choice",
            VarValue::Str(config.choices[selected].name.clone()),
        );
        Evaluation::Continue(EdgeLabel::Default)
    }
}

fn eval_end_flow(
    config: &EndFlowConfig,
    ctx: &RunContext,
    event: &TriggerEvent,
    effects: &mut Vec<EffectRequest>,
) -> Evaluation {
    match config {
        EndFlowConfig::Stop => Evaluation::Terminate(TerminationKind::Stop),
        EndFlowConfig::Message { message } => {
            effects.push(EffectRequest::SendMessage {
                to: event.reply_address(),
                text: message.clone(),
            });
            Evaluation::Terminate(TerminationKind::Message)
        }
        EndFlowConfig::Redirect { workflow_id } => {
            effects.push(EffectRequest::StartWorkflow {
                workflow_id: *workflow_id,
                context: Box::new(ctx.clone()),
            });
            Evaluation::Terminate(TerminationKind::Redirect {
                workflow_id: *workflow_id,
            })
        }
        EndFlowConfig::Return { return_value } => Evaluation::Terminate(TerminationKind::Return {
            value: return_value.clone(),
        }),
    }
}
