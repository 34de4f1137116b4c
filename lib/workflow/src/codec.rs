//! Conversion between stored node rows and the renderable graph shape
//! used by visual editors.
//!
//! The renderable form is a flat `nodes` + `edges` payload: every node
//! carries its config untagged, and each branch edge names its slot through
//! a `sourceHandle`. Decoding is strict about shape (ids, handles, edge
//! endpoints, per-slot uniqueness) so that encode and decode invert each
//! other, but it does not validate graph-level rules; that stays with
//! [`crate::graph::FlowGraph::validate`].

use crate::config::NodeConfig;
use crate::error::CodecError;
use crate::node::{EdgeLabel, NodeId, NodeKind, Position, WorkflowNode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The node payload nested under a renderable node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderData {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub config: JsonValue,
    pub has_conditional_outputs: bool,
    pub is_trigger: bool,
}

/// One node in the renderable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub position: Position,
    pub data: RenderData,
}

/// One edge in the renderable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

/// The full renderable graph payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderGraph {
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
}

const RENDER_NODE_TYPE: &str = "workflowNode";

fn edge_id(source: NodeId, target: NodeId, label: EdgeLabel) -> String {
    match label.handle() {
        Some(handle) => format!("e{}-{}-{handle}", source.value(), target.value()),
        None => format!("e{}-{}", source.value(), target.value()),
    }
}

/// Encodes workflow nodes into the renderable payload.
///
/// # Errors
///
/// Returns an error if a node config fails to serialize.
pub fn to_renderable(nodes: &[WorkflowNode]) -> Result<RenderGraph, CodecError> {
    let mut render_nodes = Vec::with_capacity(nodes.len());
    let mut render_edges = Vec::new();
    for node in nodes {
        let config = node.config.to_value().map_err(|error| CodecError::NodeConfig {
            node_id: node.id,
            error,
        })?;
        render_nodes.push(RenderNode {
            id: node.id.value().to_string(),
            node_type: RENDER_NODE_TYPE.to_string(),
            position: node.position,
            data: RenderData {
                label: node.name.clone(),
                kind: node.kind(),
                config,
                has_conditional_outputs: node.is_branching(),
                is_trigger: node.is_trigger(),
            },
        });
        for (label, target) in node.out_edges() {
            render_edges.push(RenderEdge {
                id: edge_id(node.id, target, label),
                source: node.id.value().to_string(),
                target: target.value().to_string(),
                source_handle: label.handle().map(str::to_string),
            });
        }
    }
    Ok(RenderGraph {
        nodes: render_nodes,
        edges: render_edges,
    })
}

fn parse_node_id(raw: &str) -> Result<NodeId, CodecError> {
    raw.parse::<i64>()
        .map(NodeId::new)
        .map_err(|_| CodecError::InvalidNodeId {
            raw: raw.to_string(),
        })
}

/// Decodes a renderable payload back into workflow nodes.
///
/// Node order follows the payload. Edges fill the connection slots; a
/// second edge through the same slot is an error rather than a silent
/// overwrite.
///
/// # Errors
///
/// Returns the first structural defect found: a non-integer node id, an
/// unknown source handle, an edge endpoint missing from `nodes`, a
/// duplicated slot, or a config rejected by its node type.
pub fn from_renderable(graph: &RenderGraph) -> Result<Vec<WorkflowNode>, CodecError> {
    let mut nodes = Vec::with_capacity(graph.nodes.len());
    for render in &graph.nodes {
        let id = parse_node_id(&render.id)?;
        let config = NodeConfig::from_value(render.data.kind, render.data.config.clone())
            .map_err(|error| CodecError::NodeConfig { node_id: id, error })?;
        let mut node = WorkflowNode::new(id, render.data.label.clone(), config);
        node.position = render.position;
        nodes.push(node);
    }

    for edge in &graph.edges {
        let source = parse_node_id(&edge.source).map_err(|_| CodecError::UnknownNode {
            edge_id: edge.id.clone(),
            node: edge.source.clone(),
        })?;
        let target = parse_node_id(&edge.target).map_err(|_| CodecError::UnknownNode {
            edge_id: edge.id.clone(),
            node: edge.target.clone(),
        })?;
        let label = match edge.source_handle.as_deref() {
            None => EdgeLabel::Default,
            Some("true") => EdgeLabel::True,
            Some("false") => EdgeLabel::False,
            Some(handle) => {
                return Err(CodecError::UnknownEdgeLabel {
                    edge_id: edge.id.clone(),
                    handle: handle.to_string(),
                });
            }
        };
        if !nodes.iter().any(|n| n.id == target) {
            return Err(CodecError::UnknownNode {
                edge_id: edge.id.clone(),
                node: edge.target.clone(),
            });
        }
        let node = nodes
            .iter_mut()
            .find(|n| n.id == source)
            .ok_or_else(|| CodecError::UnknownNode {
                edge_id: edge.id.clone(),
                node: edge.source.clone(),
            })?;
        if node.target(label).is_some() {
            return Err(CodecError::DuplicateEdge {
                node_id: source,
                label,
            });
        }
        node.set_target(label, Some(target));
    }

    Ok(nodes)
}
