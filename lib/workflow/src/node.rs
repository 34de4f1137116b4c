//! Workflow node types.
//!
//! Nodes are the building blocks of workflows. Each node has:
//! - An integer id, unique within a workflow, assigned at creation
//! - A type from a closed set (trigger and action/logic variants)
//! - A typed configuration (see [`crate::config`])
//! - Up to three outgoing connection slots (default, true, false)
//!
//! The node list is the single source of truth for the graph; edges are a
//! read-only projection of the connection slots.

use crate::config::NodeConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A node's integer id, unique within a workflow.
///
/// The persistence layer allocates these from a single sequence, so ids are
/// unique across workflows in practice; the engine only relies on per-workflow
/// uniqueness except for webhook endpoint lookup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    /// The persisted sentinel meaning "unconnected".
    pub const UNCONNECTED: i64 = -1;

    /// Creates a node id from its integer value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the integer value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Interprets a persisted connection column: absent or `-1` means
    /// unconnected.
    #[must_use]
    pub fn from_column(raw: Option<i64>) -> Option<Self> {
        match raw {
            None => None,
            Some(v) if v == Self::UNCONNECTED => None,
            Some(v) => Some(Self(v)),
        }
    }

    /// Converts a connection slot back to its persisted column form.
    #[must_use]
    pub fn to_column(slot: Option<Self>) -> Option<i64> {
        slot.map(|id| id.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The closed set of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Trigger: inbound message contains a configured keyword.
    Keyword,
    /// Trigger: any inbound message on a bound WhatsApp account.
    WhatsappMessage,
    /// Trigger: any inbound message on a bound Telegram account.
    TelegramMessage,
    /// Trigger: first message ever seen from a sender identity.
    NewContact,
    /// Trigger: timer (interval, cron, or one-shot).
    Scheduled,
    /// Trigger: inbound HTTP call to a generated URL.
    WebhookTrigger,
    /// Binary branch on a field/operator/value comparison.
    Condition,
    /// Bounded iteration over a count, array variable, or condition.
    Loop,
    /// One or more atomic variable assignments.
    SetVariable,
    /// Weighted random selection between named choices.
    RandomChoice,
    /// Terminal action.
    EndFlow,
}

impl NodeKind {
    /// Returns true for node types that start a run.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            Self::Keyword
                | Self::WhatsappMessage
                | Self::TelegramMessage
                | Self::NewContact
                | Self::Scheduled
                | Self::WebhookTrigger
        )
    }

    /// Returns true for node types that route through true/false slots.
    #[must_use]
    pub fn is_branching(&self) -> bool {
        matches!(self, Self::Condition | Self::Loop | Self::RandomChoice)
    }

    /// Returns the persisted type tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::WhatsappMessage => "whatsapp_message",
            Self::TelegramMessage => "telegram_message",
            Self::NewContact => "new_contact",
            Self::Scheduled => "scheduled",
            Self::WebhookTrigger => "webhook_trigger",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::SetVariable => "set_variable",
            Self::RandomChoice => "random_choice",
            Self::EndFlow => "end_flow",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "whatsapp_message" => Ok(Self::WhatsappMessage),
            "telegram_message" => Ok(Self::TelegramMessage),
            "new_contact" => Ok(Self::NewContact),
            "scheduled" => Ok(Self::Scheduled),
            "webhook_trigger" => Ok(Self::WebhookTrigger),
            "condition" => Ok(Self::Condition),
            "loop" => Ok(Self::Loop),
            "set_variable" => Ok(Self::SetVariable),
            "random_choice" => Ok(Self::RandomChoice),
            "end_flow" => Ok(Self::EndFlow),
            other => Err(ConfigError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// The label of an outgoing edge, one per connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    /// The single outgoing edge of a non-branching node.
    Default,
    /// The true branch (also a loop's cycle output).
    True,
    /// The false branch (also a loop's done output).
    False,
}

impl EdgeLabel {
    /// Returns the renderable source handle, if any.
    ///
    /// Default edges carry no handle; true/false edges carry theirs.
    #[must_use]
    pub fn handle(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::True => Some("true"),
            Self::False => Some("false"),
        }
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
        }
    }
}

/// Canvas position, presentation-only. Ignored by execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A workflow node: one step in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique id within the workflow, immutable.
    pub id: NodeId,
    /// Display label. No semantic effect on execution.
    pub name: String,
    /// Typed configuration; determines the node's behavior.
    pub config: NodeConfig,
    /// Canvas position.
    pub position: Position,
    /// Default outgoing edge (non-branching types).
    pub connected_to: Option<NodeId>,
    /// True branch (branching types; a loop's cycle output).
    pub connected_to_true: Option<NodeId>,
    /// False branch (branching types; a loop's done output).
    pub connected_to_false: Option<NodeId>,
}

impl WorkflowNode {
    /// Creates an unconnected node at the origin.
    #[must_use]
    pub fn new(id: NodeId, name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id,
            name: name.into(),
            config,
            position: Position::default(),
            connected_to: None,
            connected_to_true: None,
            connected_to_false: None,
        }
    }

    /// Returns the node's type.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Returns true if this node starts a run.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.kind().is_trigger()
    }

    /// Returns true if this node routes through true/false slots.
    ///
    /// A `random_choice` node branches only when configured with exactly
    /// two outcomes; with any other count it routes through the default
    /// slot and records the chosen name as a variable.
    #[must_use]
    pub fn is_branching(&self) -> bool {
        match &self.config {
            NodeConfig::RandomChoice(c) => c.choices.len() == 2,
            _ => self.kind().is_branching(),
        }
    }

    /// Returns the target of the given edge, if connected.
    #[must_use]
    pub fn target(&self, label: EdgeLabel) -> Option<NodeId> {
        match label {
            EdgeLabel::Default => self.connected_to,
            EdgeLabel::True => self.connected_to_true,
            EdgeLabel::False => self.connected_to_false,
        }
    }

    /// Sets the target of the given edge.
    pub fn set_target(&mut self, label: EdgeLabel, target: Option<NodeId>) {
        match label {
            EdgeLabel::Default => self.connected_to = target,
            EdgeLabel::True => self.connected_to_true = target,
            EdgeLabel::False => self.connected_to_false = target,
        }
    }

    /// A loop's cycle output (stored in the true slot).
    #[must_use]
    pub fn cycle_target(&self) -> Option<NodeId> {
        self.connected_to_true
    }

    /// A loop's done output (stored in the false slot).
    #[must_use]
    pub fn done_target(&self) -> Option<NodeId> {
        self.connected_to_false
    }

    /// Projects the connection slots as labeled edges.
    #[must_use]
    pub fn out_edges(&self) -> Vec<(EdgeLabel, NodeId)> {
        let mut edges = Vec::new();
        for label in [EdgeLabel::Default, EdgeLabel::True, EdgeLabel::False] {
            if let Some(target) = self.target(label) {
                edges.push((label, target));
            }
        }
        edges
    }

    /// Builder-style edge assignment, used heavily in tests.
    #[must_use]
    pub fn with_target(mut self, label: EdgeLabel, target: NodeId) -> Self {
        self.set_target(label, Some(target));
        self
    }

    /// Builder-style position assignment.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }
}

/// The persisted node record, as stored by the relational layer.
///
/// The config is an opaque JSON string here; [`NodeRecord::decode`] turns it
/// into a typed [`WorkflowNode`] (and is the only path into evaluation).
/// Connection columns use `-1` or absence for "unconnected".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: i64,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub config: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_to: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_to_true: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_to_false: Option<i64>,
}

impl NodeRecord {
    /// Decodes the record into a typed node.
    ///
    /// # Errors
    ///
    /// Returns an error if the type tag is unknown or the raw config does not
    /// deserialize and validate under that type's schema.
    pub fn decode(&self) -> Result<WorkflowNode, ConfigError> {
        let kind: NodeKind = self.node_type.parse()?;
        let config = NodeConfig::from_raw(kind, &self.config)?;
        Ok(WorkflowNode {
            id: NodeId::new(self.id),
            name: self.name.clone(),
            config,
            position: Position::new(self.x, self.y),
            connected_to: NodeId::from_column(self.connected_to),
            connected_to_true: NodeId::from_column(self.connected_to_true),
            connected_to_false: NodeId::from_column(self.connected_to_false),
        })
    }

    /// Encodes a typed node back into the persisted shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized.
    pub fn encode(node: &WorkflowNode) -> Result<Self, ConfigError> {
        Ok(Self {
            id: node.id.value(),
            node_type: node.kind().as_str().to_string(),
            name: node.name.clone(),
            config: node.config.to_raw()?,
            x: node.position.x,
            y: node.position.y,
            connected_to: NodeId::to_column(node.connected_to),
            connected_to_true: NodeId::to_column(node.connected_to_true),
            connected_to_false: NodeId::to_column(node.connected_to_false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConditionConfig, ConditionField, ConditionOperator, KeywordConfig};

    fn keyword_node(id: i64) -> WorkflowNode {
        WorkflowNode::new(
            NodeId::new(id),
            "Devis",
            NodeConfig::Keyword(KeywordConfig {
                keywords: "devis\nprix".to_string(),
            }),
        )
    }

    fn condition_node(id: i64) -> WorkflowNode {
        WorkflowNode::new(
            NodeId::new(id),
            "Urgent?",
            NodeConfig::Condition(ConditionConfig {
                field: ConditionField::Message,
                operator: ConditionOperator::Contains,
                value: "urgent".to_string(),
            }),
        )
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::new(7).to_string(), "node_7");
    }

    #[test]
    fn sentinel_column_reads_as_unconnected() {
        assert_eq!(NodeId::from_column(Some(-1)), None);
        assert_eq!(NodeId::from_column(None), None);
        assert_eq!(NodeId::from_column(Some(4)), Some(NodeId::new(4)));
    }

    #[test]
    fn kind_string_roundtrip() {
        for kind in [
            NodeKind::Keyword,
            NodeKind::WhatsappMessage,
            NodeKind::TelegramMessage,
            NodeKind::NewContact,
            NodeKind::Scheduled,
            NodeKind::WebhookTrigger,
            NodeKind::Condition,
            NodeKind::Loop,
            NodeKind::SetVariable,
            NodeKind::RandomChoice,
            NodeKind::EndFlow,
        ] {
            let parsed: NodeKind = kind.as_str().parse().expect("should parse");
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let result: Result<NodeKind, _> = "carrier_pigeon".parse();
        assert!(matches!(result, Err(ConfigError::UnknownKind { .. })));
    }

    #[test]
    fn out_edges_projection() {
        let node = condition_node(1)
            .with_target(EdgeLabel::True, NodeId::new(2))
            .with_target(EdgeLabel::False, NodeId::new(3));
        assert_eq!(
            node.out_edges(),
            vec![
                (EdgeLabel::True, NodeId::new(2)),
                (EdgeLabel::False, NodeId::new(3)),
            ]
        );
    }

    #[test]
    fn trigger_classification() {
        assert!(keyword_node(1).is_trigger());
        assert!(!condition_node(2).is_trigger());
        assert!(condition_node(2).is_branching());
    }

    #[test]
    fn record_decode_maps_sentinel() {
        let record = NodeRecord {
            id: 5,
            node_type: "keyword".to_string(),
            name: "Devis".to_string(),
            config: r#"{"keywords":"devis"}"#.to_string(),
            x: 10.0,
            y: 20.0,
            connected_to: Some(-1),
            connected_to_true: None,
            connected_to_false: None,
        };
        let node = record.decode().expect("should decode");
        assert_eq!(node.id, NodeId::new(5));
        assert_eq!(node.connected_to, None);
        assert_eq!(node.kind(), NodeKind::Keyword);
    }

    #[test]
    fn record_encode_decode_roundtrip() {
        let node = condition_node(9)
            .at(100.0, 50.0)
            .with_target(EdgeLabel::True, NodeId::new(10));
        let record = NodeRecord::encode(&node).expect("should encode");
        assert_eq!(record.node_type, "condition");
        let decoded = record.decode().expect("should decode");
        assert_eq!(decoded, node);
    }

    #[test]
    fn record_decode_rejects_bad_config() {
        let record = NodeRecord {
            id: 1,
            node_type: "keyword".to_string(),
            name: "broken".to_string(),
            config: r#"{"keywords":"   "}"#.to_string(),
            x: 0.0,
            y: 0.0,
            connected_to: None,
            connected_to_true: None,
            connected_to_false: None,
        };
        assert!(matches!(
            record.decode(),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
