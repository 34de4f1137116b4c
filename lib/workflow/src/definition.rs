//! Workflow definitions and their lifecycle.
//!
//! A workflow starts in draft, where any shape is tolerated. Activation
//! runs full validation; only active workflows match live events and run.

use crate::error::ValidationError;
use crate::graph::FlowGraph;
use crate::node::WorkflowNode;
use chrono::{DateTime, Utc};
use flowbot_core::WorkflowId;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Whether a workflow may match events and run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Draft,
    Active,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => f.write_str("draft"),
            Self::Active => f.write_str("active"),
        }
    }
}

/// Descriptive fields with no effect on execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A workflow: nodes plus metadata and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    id: WorkflowId,
    metadata: WorkflowMetadata,
    nodes: Vec<WorkflowNode>,
    state: WorkflowState,
}

impl Workflow {
    /// Creates a draft workflow.
    #[must_use]
    pub fn new(name: impl Into<String>, nodes: Vec<WorkflowNode>) -> Self {
        Self {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata::new(name),
            nodes,
            state: WorkflowState::Draft,
        }
    }

    #[must_use]
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn metadata(&self) -> &WorkflowMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    #[must_use]
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == WorkflowState::Active
    }

    /// Builds the graph view of this workflow's nodes.
    #[must_use]
    pub fn graph(&self) -> FlowGraph {
        FlowGraph::new(self.nodes.clone())
    }

    /// Replaces the node set. Any edit sends the workflow back to draft
    /// until it is re-activated.
    pub fn replace_nodes(&mut self, nodes: Vec<WorkflowNode>) {
        self.nodes = nodes;
        self.state = WorkflowState::Draft;
        self.metadata.updated_at = Utc::now();
    }

    /// Validates and activates the workflow for live triggers.
    ///
    /// # Errors
    ///
    /// Returns every validation error at once; the workflow stays in
    /// draft.
    pub fn activate(&mut self) -> Result<(), Vec<ValidationError>> {
        self.graph().validate()?;
        self.state = WorkflowState::Active;
        self.metadata.updated_at = Utc::now();
        info!(workflow_id = %self.id, name = %self.metadata.name, "workflow activated");
        Ok(())
    }

    /// Takes the workflow out of rotation without touching its nodes.
    pub fn deactivate(&mut self) {
        self.state = WorkflowState::Draft;
        self.metadata.updated_at = Utc::now();
    }

    /// A listing row for this workflow.
    #[must_use]
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id,
            name: self.metadata.name.clone(),
            state: self.state,
            node_count: self.nodes.len(),
            updated_at: self.metadata.updated_at,
        }
    }
}

/// Compact listing view of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub state: WorkflowState,
    pub node_count: usize,
    pub updated_at: DateTime<Utc>,
}
