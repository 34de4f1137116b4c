//! Per-run mutable state: variables, visit counts, and warnings.

use crate::error::RunWarning;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A run variable value.
///
/// Variables are loosely typed; every value renders to a string for
/// message templating and coerces to a number where a comparison needs
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<VarValue>),
}

impl VarValue {
    /// Renders the value for display and templating.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => {
                // Integral floats print without the trailing ".0".
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::Str(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(VarValue::render)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Coerces the value to a number when possible.
    ///
    /// Strings of the form `HH:MM` coerce to minutes since midnight so
    /// time-of-day comparisons work numerically.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Number(n) => Some(*n),
            Self::Str(s) => parse_numeric(s),
            Self::List(_) => None,
        }
    }

    /// Truthiness for while-loop and boolean-expression contexts.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// Converts a JSON value, stringifying objects.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Str(String::new()),
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::String(s) => Self::Str(s.clone()),
            JsonValue::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(_) => Self::Str(value.to_string()),
        }
    }
}

/// Parses a plain number or an `HH:MM` time-of-day as minutes.
fn parse_numeric(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(n) = s.parse::<f64>() {
        return Some(n);
    }
    let (hours, minutes) = s.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(f64::from(hours * 60 + minutes))
}

/// The mutable context a run carries across nodes and suspensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    #[serde(default)]
    variables: HashMap<String, VarValue>,
    #[serde(default)]
    visit_counts: HashMap<NodeId, u32>,
    /// Set when a loop suspends for its between-iteration delay, so a
    /// resume at that node neither re-suspends nor re-counts the visit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_delay: Option<NodeId>,
    /// Most recent API-call response, readable by `set_variable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_api_response: Option<JsonValue>,
    #[serde(default)]
    warnings: Vec<RunWarning>,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: VarValue) {
        self.variables.insert(name.into(), value);
    }

    #[must_use]
    pub fn variables(&self) -> &HashMap<String, VarValue> {
        &self.variables
    }

    /// Times the node has been evaluated during this run.
    #[must_use]
    pub fn visits(&self, node: NodeId) -> u32 {
        self.visit_counts.get(&node).copied().unwrap_or(0)
    }

    pub fn record_visit(&mut self, node: NodeId) {
        *self.visit_counts.entry(node).or_insert(0) += 1;
    }

    pub fn set_pending_delay(&mut self, node: NodeId) {
        self.pending_delay = Some(node);
    }

    /// Clears and reports whether a pending loop delay was parked at this
    /// node.
    pub fn take_pending_delay(&mut self, node: NodeId) -> bool {
        if self.pending_delay == Some(node) {
            self.pending_delay = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn last_api_response(&self) -> Option<&JsonValue> {
        self.last_api_response.as_ref()
    }

    pub fn set_last_api_response(&mut self, response: JsonValue) {
        self.last_api_response = Some(response);
    }

    pub fn warn(&mut self, warning: RunWarning) {
        self.warnings.push(warning);
    }

    #[must_use]
    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<RunWarning> {
        std::mem::take(&mut self.warnings)
    }
}
