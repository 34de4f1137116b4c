//! The directed-graph view of a workflow and its validator.
//!
//! Construction is lenient so a half-built workflow can still be rendered;
//! [`FlowGraph::validate`] reports everything wrong with the graph at once
//! instead of stopping at the first defect.

use crate::error::ValidationError;
use crate::node::{EdgeLabel, NodeId, NodeKind, WorkflowNode};
use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// A workflow's nodes and connections as a petgraph directed graph.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: DiGraph<WorkflowNode, EdgeLabel>,
    index: HashMap<NodeId, NodeIndex>,
    /// Node ids that appeared more than once; later duplicates are dropped.
    duplicates: Vec<NodeId>,
}

impl FlowGraph {
    /// Builds the graph from a node list. Duplicate ids and dangling
    /// connection targets are tolerated here and reported by `validate`.
    #[must_use]
    pub fn new(nodes: Vec<WorkflowNode>) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut duplicates = Vec::new();
        for node in nodes {
            let id = node.id;
            if index.contains_key(&id) {
                duplicates.push(id);
                continue;
            }
            let idx = graph.add_node(node);
            index.insert(id, idx);
        }
        for idx in index.values().copied().collect::<Vec<_>>() {
            let edges = graph[idx].out_edges();
            for (label, target) in edges {
                if let Some(&target_idx) = index.get(&target) {
                    graph.add_edge(idx, target_idx, label);
                }
            }
        }
        Self {
            graph,
            index,
            duplicates,
        }
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&WorkflowNode> {
        self.index.get(&id).map(|&idx| &self.graph[idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.graph.node_weights()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// The workflow's trigger node, when exactly one exists.
    #[must_use]
    pub fn trigger(&self) -> Option<&WorkflowNode> {
        let mut triggers = self.nodes().filter(|n| n.is_trigger());
        let first = triggers.next()?;
        if triggers.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Outgoing edges of a node as `(label, target)` pairs.
    #[must_use]
    pub fn edges(&self, id: NodeId) -> Vec<(EdgeLabel, NodeId)> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (*edge.weight(), self.graph[edge.target()].id))
            .collect()
    }

    /// Checks the whole graph, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns all violations found, never just the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for &id in &self.duplicates {
            errors.push(ValidationError::DuplicateNodeId { node_id: id });
        }

        let triggers: Vec<NodeId> = self
            .nodes()
            .filter(|n| n.is_trigger())
            .map(|n| n.id)
            .collect();
        match triggers.as_slice() {
            [] => errors.push(ValidationError::NoTrigger),
            [_] => {}
            _ => errors.push(ValidationError::MultipleTriggers {
                node_ids: triggers.clone(),
            }),
        }

        for node in self.nodes() {
            // Slot shape per node kind.
            if node.is_branching() {
                if node.target(EdgeLabel::Default).is_some() {
                    errors.push(ValidationError::DefaultSlotOnBranchNode { node_id: node.id });
                }
            } else {
                for label in [EdgeLabel::True, EdgeLabel::False] {
                    if node.target(label).is_some() {
                        errors.push(ValidationError::BranchSlotOnLinearNode {
                            node_id: node.id,
                            label,
                        });
                    }
                }
            }
            // Dangling targets and inbound edges into triggers.
            for (label, target) in node.out_edges() {
                match self.node(target) {
                    None => errors.push(ValidationError::DanglingTarget {
                        node_id: node.id,
                        label,
                        target,
                    }),
                    Some(dest) if dest.is_trigger() => {
                        errors.push(ValidationError::TriggerHasIncomingEdge {
                            trigger: target,
                            source: node.id,
                        });
                    }
                    Some(_) => {}
                }
            }
            // Per-node config rules.
            if let Err(error) = node.config.validate() {
                errors.push(ValidationError::Config {
                    node_id: node.id,
                    error,
                });
            }
        }

        self.check_cycles(&mut errors);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Cycles are legal only when every back edge is a loop node's cycle
    /// output. Removing those edges must leave the graph acyclic.
    fn check_cycles(&self, errors: &mut Vec<ValidationError>) {
        let mut pruned = self.graph.clone();
        pruned.retain_edges(|g, e| {
            let (source, _) = g.edge_endpoints(e).expect("edge exists during retain");
            let label = *g.edge_weight(e).expect("edge weight exists during retain");
            !(g[source].kind() == NodeKind::Loop && label == EdgeLabel::True)
        });
        if !is_cyclic_directed(&pruned) {
            return;
        }
        // Report one node per offending strongly connected component.
        for component in tarjan_scc(&pruned) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&idx| pruned.find_edge(idx, idx).is_some());
            if cyclic {
                let node_id = component
                    .iter()
                    .map(|&idx| pruned[idx].id)
                    .min()
                    .expect("component is non-empty");
                errors.push(ValidationError::UnboundedCycle { node_id });
            }
        }
    }
}

/// Validates a node list without keeping the graph around.
///
/// # Errors
///
/// Returns all violations found.
pub fn validate_nodes(nodes: &[WorkflowNode]) -> Result<(), Vec<ValidationError>> {
    FlowGraph::new(nodes.to_vec()).validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Assignment, AssignmentSource, ConditionConfig, ConditionField, ConditionOperator,
        EndFlowConfig, KeywordConfig, LoopConfig, LoopType, NodeConfig, SetVariableConfig,
    };
    use crate::node::WorkflowNode;

    fn keyword_trigger(id: i64) -> WorkflowNode {
        WorkflowNode::new(
            NodeId::new(id),
            "Trigger",
            NodeConfig::Keyword(KeywordConfig {
                keywords: "devis".to_string(),
            }),
        )
    }

    fn condition(id: i64) -> WorkflowNode {
        WorkflowNode::new(
            NodeId::new(id),
            "Condition",
            NodeConfig::Condition(ConditionConfig {
                field: ConditionField::Message,
                operator: ConditionOperator::Contains,
                value: "urgent".to_string(),
            }),
        )
    }

    fn end(id: i64) -> WorkflowNode {
        WorkflowNode::new(
            NodeId::new(id),
            "End",
            NodeConfig::EndFlow(EndFlowConfig::Stop),
        )
    }

    fn count_loop(id: i64) -> WorkflowNode {
        WorkflowNode::new(
            NodeId::new(id),
            "Loop",
            NodeConfig::Loop(LoopConfig {
                loop_type: LoopType::Count { count: 3 },
                delay_between: 0,
                max_iterations: 100,
            }),
        )
    }

    #[test]
    fn valid_linear_workflow() {
        let nodes = vec![
            keyword_trigger(1).with_target(EdgeLabel::Default, NodeId::new(2)),
            end(2),
        ];
        assert!(validate_nodes(&nodes).is_ok());
    }

    #[test]
    fn reports_all_errors_at_once() {
        // No trigger, a dangling target, and a branch slot on a linear node.
        let nodes = vec![
            end(1).with_target(EdgeLabel::Default, NodeId::new(99)),
            end(2).with_target(EdgeLabel::True, NodeId::new(1)),
        ];
        let errors = validate_nodes(&nodes).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::NoTrigger))
        );
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::DanglingTarget { .. }))
        );
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::BranchSlotOnLinearNode { .. }))
        );
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn trigger_cannot_have_incoming_edge() {
        let nodes = vec![
            keyword_trigger(1).with_target(EdgeLabel::Default, NodeId::new(2)),
            end(2),
            condition(3)
                .with_target(EdgeLabel::True, NodeId::new(1))
                .with_target(EdgeLabel::False, NodeId::new(2)),
        ];
        let errors = validate_nodes(&nodes).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::TriggerHasIncomingEdge { trigger, source }
                if *trigger == NodeId::new(1) && *source == NodeId::new(3)
        )));
    }

    #[test]
    fn branch_node_rejects_default_slot() {
        let mut cond = condition(2);
        cond.connected_to = Some(NodeId::new(3));
        let nodes = vec![
            keyword_trigger(1).with_target(EdgeLabel::Default, NodeId::new(2)),
            cond,
            end(3),
        ];
        let errors = validate_nodes(&nodes).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::DefaultSlotOnBranchNode { node_id } if *node_id == NodeId::new(2)
        )));
    }

    #[test]
    fn loop_cycle_is_allowed() {
        let nodes = vec![
            keyword_trigger(1).with_target(EdgeLabel::Default, NodeId::new(2)),
            count_loop(2)
                .with_target(EdgeLabel::True, NodeId::new(3))
                .with_target(EdgeLabel::False, NodeId::new(4)),
            end(3),
            end(4),
        ];
        assert!(validate_nodes(&nodes).is_ok());
    }

    #[test]
    fn non_loop_cycle_is_rejected() {
        let nodes = vec![
            keyword_trigger(1).with_target(EdgeLabel::Default, NodeId::new(2)),
            condition(2)
                .with_target(EdgeLabel::True, NodeId::new(3))
                .with_target(EdgeLabel::False, NodeId::new(4)),
            condition(3)
                .with_target(EdgeLabel::True, NodeId::new(2))
                .with_target(EdgeLabel::False, NodeId::new(4)),
            end(4),
        ];
        let errors = validate_nodes(&nodes).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::UnboundedCycle { .. }))
        );
    }

    #[test]
    fn cycle_through_loop_body_is_allowed() {
        // loop -> body -> back to loop: pruning the loop's cycle output
        // breaks the cycle, so this shape is legal.
        let nodes = vec![
            keyword_trigger(1).with_target(EdgeLabel::Default, NodeId::new(2)),
            count_loop(2)
                .with_target(EdgeLabel::True, NodeId::new(3))
                .with_target(EdgeLabel::False, NodeId::new(4)),
            WorkflowNode::new(
                NodeId::new(3),
                "Body",
                NodeConfig::SetVariable(SetVariableConfig {
                    assignments: vec![Assignment {
                        name: "x".to_string(),
                        source: AssignmentSource::Static {
                            value: "1".to_string(),
                        },
                    }],
                }),
            )
            .with_target(EdgeLabel::Default, NodeId::new(2)),
            end(4),
        ];
        assert!(validate_nodes(&nodes).is_ok());
    }

    #[test]
    fn duplicate_ids_reported() {
        let nodes = vec![
            keyword_trigger(1).with_target(EdgeLabel::Default, NodeId::new(2)),
            end(2),
            end(2),
        ];
        let errors = validate_nodes(&nodes).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::DuplicateNodeId { node_id } if *node_id == NodeId::new(2)
        )));
    }

    #[test]
    fn trigger_accessor_requires_exactly_one() {
        let graph = FlowGraph::new(vec![keyword_trigger(1), keyword_trigger(2)]);
        assert!(graph.trigger().is_none());
    }
}
