//! Error types for the workflow crate.
//!
//! The taxonomy follows the lifecycle of a workflow:
//! - `ConfigError`: a single node's configuration is malformed or invalid
//! - `ValidationError`: a structural graph defect; blocks activation
//! - `CodecError`: a renderable payload from the editor is rejected
//! - `RunError`: a fatal condition that aborts a live run
//! - `RunWarning`: a recoverable condition recorded on the run
//! - `WebhookError`: an inbound webhook call rejected before the engine runs

use crate::node::{EdgeLabel, NodeId, NodeKind};
use flowbot_core::WorkflowId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from parsing or validating a single node's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The node type tag is not part of the closed set.
    UnknownKind { kind: String },
    /// The raw config does not deserialize under the type's schema.
    Malformed { kind: NodeKind, reason: String },
    /// The config deserialized but fails a semantic rule.
    Invalid { kind: NodeKind, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKind { kind } => write!(f, "unknown node type: {kind}"),
            Self::Malformed { kind, reason } => {
                write!(f, "malformed config for {kind} node: {reason}")
            }
            Self::Invalid { kind, reason } => {
                write!(f, "invalid config for {kind} node: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Structural defects found at publish time.
///
/// Validation collects every defect before reporting, so a failed
/// activation lists all of them at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The workflow has no trigger node.
    NoTrigger,
    /// The workflow has more than one trigger node.
    MultipleTriggers { node_ids: Vec<NodeId> },
    /// Another node's connection targets the trigger.
    TriggerHasIncomingEdge { trigger: NodeId, source: NodeId },
    /// Two nodes share the same id.
    DuplicateNodeId { node_id: NodeId },
    /// A connection slot references a node that does not exist.
    DanglingTarget {
        node_id: NodeId,
        label: EdgeLabel,
        target: NodeId,
    },
    /// A non-branching node has a true/false slot populated.
    BranchSlotOnLinearNode { node_id: NodeId, label: EdgeLabel },
    /// A branching node has its default slot populated.
    DefaultSlotOnBranchNode { node_id: NodeId },
    /// A cycle that does not pass through a loop node's cycle output.
    UnboundedCycle { node_id: NodeId },
    /// A node's config failed validation.
    Config { node_id: NodeId, error: ConfigError },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTrigger => write!(f, "workflow has no trigger node"),
            Self::MultipleTriggers { node_ids } => {
                write!(f, "workflow has {} trigger nodes", node_ids.len())
            }
            Self::TriggerHasIncomingEdge { trigger, source } => {
                write!(f, "trigger {trigger} has an incoming edge from {source}")
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "duplicate node id: {node_id}")
            }
            Self::DanglingTarget {
                node_id,
                label,
                target,
            } => {
                write!(
                    f,
                    "node {node_id} {label} edge targets missing node {target}"
                )
            }
            Self::BranchSlotOnLinearNode { node_id, label } => {
                write!(f, "non-branching node {node_id} has a {label} edge")
            }
            Self::DefaultSlotOnBranchNode { node_id } => {
                write!(f, "branching node {node_id} has a default edge")
            }
            Self::UnboundedCycle { node_id } => {
                write!(
                    f,
                    "cycle through node {node_id} is not bounded by a loop node"
                )
            }
            Self::Config { node_id, error } => {
                write!(f, "node {node_id}: {error}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from converting between the node list and the renderable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A renderable node id is not an integer.
    InvalidNodeId { raw: String },
    /// An edge carries an unrecognized source handle.
    UnknownEdgeLabel { edge_id: String, handle: String },
    /// An edge references a node that is not in the payload.
    UnknownNode { edge_id: String, node: String },
    /// Two edges leave the same node through the same handle.
    DuplicateEdge { node_id: NodeId, label: EdgeLabel },
    /// A renderable node's config was rejected.
    NodeConfig { node_id: NodeId, error: ConfigError },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNodeId { raw } => write!(f, "invalid node id: {raw}"),
            Self::UnknownEdgeLabel { edge_id, handle } => {
                write!(f, "edge {edge_id} has unknown source handle '{handle}'")
            }
            Self::UnknownNode { edge_id, node } => {
                write!(f, "edge {edge_id} references unknown node {node}")
            }
            Self::DuplicateEdge { node_id, label } => {
                write!(f, "node {node_id} has more than one {label} edge")
            }
            Self::NodeConfig { node_id, error } => {
                write!(f, "node {node_id}: {error}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Fatal conditions that abort a live run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    /// The run exceeded its wall-clock budget.
    Timeout,
    /// The run was cancelled between node evaluations.
    Cancelled,
    /// The workflow is not active.
    NotActive { workflow_id: WorkflowId },
    /// An edge led to a node id that is not in the graph.
    MissingNode { node_id: NodeId },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "run exceeded its wall-clock budget"),
            Self::Cancelled => write!(f, "run cancelled"),
            Self::NotActive { workflow_id } => {
                write!(f, "workflow {workflow_id} is not active")
            }
            Self::MissingNode { node_id } => {
                write!(f, "run reached missing node {node_id}")
            }
        }
    }
}

impl std::error::Error for RunError {}

/// Recoverable conditions recorded on a run for observability.
///
/// Warnings never abort a run; the engine degrades and continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// A sandboxed expression failed; no variable was set.
    ExpressionFailed { node_id: NodeId, reason: String },
    /// A loop hit its iteration cap and was forced onto the done edge.
    LoopLimitExceeded { node_id: NodeId, limit: u32 },
    /// A referenced variable was absent and read as empty.
    MissingVariable { node_id: NodeId, name: String },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpressionFailed { node_id, reason } => {
                write!(f, "expression failed at node {node_id}: {reason}")
            }
            Self::LoopLimitExceeded { node_id, limit } => {
                write!(f, "loop {node_id} reached its cap of {limit} iterations")
            }
            Self::MissingVariable { node_id, name } => {
                write!(f, "node {node_id} read missing variable '{name}' as empty")
            }
        }
    }
}

/// Rejections of inbound webhook calls, produced before the engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// No active webhook trigger owns this endpoint.
    UnknownEndpoint { node_id: NodeId },
    /// The endpoint exists but does not accept this HTTP method.
    MethodNotAllowed { node_id: NodeId, method: String },
    /// The supplied secret does not match the configured one.
    SecretMismatch { node_id: NodeId },
}

impl fmt::Display for WebhookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEndpoint { node_id } => {
                write!(f, "no webhook endpoint for node {node_id}")
            }
            Self::MethodNotAllowed { node_id, method } => {
                write!(f, "webhook {node_id} does not accept {method}")
            }
            Self::SecretMismatch { node_id } => {
                write!(f, "webhook {node_id} secret mismatch")
            }
        }
    }
}

impl std::error::Error for WebhookError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::UnknownKind {
            kind: "frobnicate".to_string(),
        };
        assert!(err.to_string().contains("unknown node type"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError::DanglingTarget {
            node_id: NodeId::new(3),
            label: EdgeLabel::True,
            target: NodeId::new(99),
        };
        let text = err.to_string();
        assert!(text.contains("node_3"));
        assert!(text.contains("node_99"));
    }

    #[test]
    fn codec_error_display() {
        let err = CodecError::UnknownEdgeLabel {
            edge_id: "e1-2".to_string(),
            handle: "maybe".to_string(),
        };
        assert!(err.to_string().contains("'maybe'"));
    }

    #[test]
    fn run_warning_serde_roundtrip() {
        let warning = RunWarning::LoopLimitExceeded {
            node_id: NodeId::new(7),
            limit: 3,
        };
        let json = serde_json::to_string(&warning).expect("serialize");
        let parsed: RunWarning = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(warning, parsed);
    }

    #[test]
    fn webhook_error_display() {
        let err = WebhookError::SecretMismatch {
            node_id: NodeId::new(12),
        };
        assert!(err.to_string().contains("secret mismatch"));
    }
}
