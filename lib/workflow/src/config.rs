//! Typed node configurations and their validation.
//!
//! This is the data half of the node type registry: one config struct per
//! node type, a tagged [`NodeConfig`] union over them, and a total validation
//! function from raw JSON into the union. The behavior half (evaluation)
//! lives in [`crate::registry`].
//!
//! The persistence layer stores configs as opaque JSON strings; every path
//! into evaluation goes through [`NodeConfig::from_raw`], so stringly-typed
//! config access never reaches the engine.

use crate::error::ConfigError;
use crate::event::HttpMethod;
use crate::node::NodeKind;
use chrono::{DateTime, Duration, Utc};
use flowbot_core::{ChannelAccountId, WorkflowId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Config for the `keyword` trigger: newline-delimited keyword list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordConfig {
    /// Newline-delimited keywords; matching is case-insensitive substring.
    pub keywords: String,
}

impl KeywordConfig {
    /// Iterates the non-empty, trimmed keywords.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords
            .lines()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Config for `whatsapp_message` / `telegram_message` triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageConfig {
    /// The bound channel account. The trigger never matches while the
    /// account is disconnected.
    pub account_id: ChannelAccountId,
}

/// Config for the `new_contact` trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContactConfig {
    /// Restrict to one account; `None` matches any connected account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<ChannelAccountId>,
}

/// Units for interval schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl IntervalUnit {
    /// Converts `value` of this unit into a duration.
    #[must_use]
    pub fn duration(&self, value: u32) -> Duration {
        let value = i64::from(value);
        match self {
            Self::Minutes => Duration::minutes(value),
            Self::Hours => Duration::hours(value),
            Self::Days => Duration::days(value),
            Self::Weeks => Duration::weeks(value),
        }
    }
}

/// Sub-modes of the `scheduled` trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ScheduleMode {
    /// Fire every N minutes/hours/days/weeks.
    Interval {
        interval_value: u32,
        interval_unit: IntervalUnit,
    },
    /// Standard 5-field cron expression, evaluated in the configured
    /// timezone (UTC when absent).
    Cron {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Fire exactly once at a configured instant.
    Once { at: DateTime<Utc> },
}

/// Config for the `webhook_trigger` trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTriggerConfig {
    /// Accepted HTTP method; `ANY` accepts all.
    #[serde(default)]
    pub method: HttpMethod,
    /// Optional shared secret, compared exactly on every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// The left-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    /// Inbound message text.
    Message,
    /// Sender identity.
    Sender,
    /// Contact display name.
    ContactName,
    /// Contact tags (newline-joined for substring operators).
    ContactTag,
    /// Sentiment label computed upstream, empty when absent.
    Sentiment,
    /// Current time of day, rendered `HH:MM` in UTC.
    CurrentTime,
    /// A named run variable.
    Variable { name: String },
}

/// Condition comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
    MatchesRegex,
}

impl ConditionOperator {
    /// Operators that ignore the configured value.
    #[must_use]
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsEmpty | Self::IsNotEmpty)
    }
}

/// Config for the `condition` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    /// Right-hand side; unused by unary operators.
    #[serde(default)]
    pub value: String,
}

/// Iteration strategies for the `loop` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "loopType",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum LoopType {
    /// Iterate a fixed number of times.
    Count { count: u32 },
    /// Iterate over the elements of a list variable. A missing or
    /// non-list variable means zero iterations.
    Array {
        variable: String,
        /// Name bound to the current element; defaults to `<variable>_item`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_variable: Option<String>,
    },
    /// Iterate until the condition becomes false.
    While { condition: ConditionConfig },
}

fn default_max_iterations() -> u32 {
    100
}

/// Config for the `loop` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(flatten)]
    pub loop_type: LoopType,
    /// Seconds to suspend between iterations; `0` means none.
    #[serde(default)]
    pub delay_between: u64,
    /// Hard safety cap. Reaching it forces the done edge and records a
    /// warning on the run, not a fatal error.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

/// Where a `set_variable` assignment takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssignmentSource {
    /// Assign the literal string.
    Static { value: String },
    /// Evaluate a sandboxed expression against the run context.
    Expression { expression: String },
    /// Copy from the most recent API-call result, optionally by JSON pointer.
    ApiResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Copy another variable's current value.
    Variable { from: String },
}

/// One assignment in a `set_variable` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub name: String,
    #[serde(flatten)]
    pub source: AssignmentSource,
}

/// Config for the `set_variable` node. Assignments apply atomically:
/// either all succeed or none are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableConfig {
    pub assignments: Vec<Assignment>,
}

fn default_weight() -> u32 {
    1
}

/// One outcome of a `random_choice` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Config for the `random_choice` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomChoiceConfig {
    pub choices: Vec<Choice>,
    /// When false, every choice weighs 1 regardless of its weight field.
    #[serde(default)]
    pub weighted: bool,
}

impl RandomChoiceConfig {
    /// Effective weight of a choice under the weighted flag.
    #[must_use]
    pub fn weight_of(&self, choice: &Choice) -> u32 {
        if self.weighted { choice.weight } else { 1 }
    }

    /// Sum of effective weights. Widened to `u64` so the sum cannot
    /// overflow whatever weights the config carries.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.choices.iter().map(|c| u64::from(self.weight_of(c))).sum()
    }
}

/// Config for the `end_flow` terminal node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum EndFlowConfig {
    /// Terminate the run, no side effect.
    Stop,
    /// Terminate after requesting a final channel message.
    Message { message: String },
    /// Terminate this run and start another workflow with the current
    /// context carried over.
    Redirect { workflow_id: WorkflowId },
    /// Terminate and yield the value as the run's result (webhook
    /// response body).
    Return { return_value: JsonValue },
}

/// Configuration for a node, tagged by the node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    Keyword(KeywordConfig),
    WhatsappMessage(ChannelMessageConfig),
    TelegramMessage(ChannelMessageConfig),
    NewContact(NewContactConfig),
    Scheduled(ScheduleMode),
    WebhookTrigger(WebhookTriggerConfig),
    Condition(ConditionConfig),
    Loop(LoopConfig),
    SetVariable(SetVariableConfig),
    RandomChoice(RandomChoiceConfig),
    EndFlow(EndFlowConfig),
}

fn parse_as<T: DeserializeOwned>(kind: NodeKind, value: JsonValue) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|e| ConfigError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

fn serialize_as<T: Serialize>(kind: NodeKind, config: &T) -> Result<JsonValue, ConfigError> {
    serde_json::to_value(config).map_err(|e| ConfigError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

impl NodeConfig {
    /// Returns the node type this config belongs to.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Keyword(_) => NodeKind::Keyword,
            Self::WhatsappMessage(_) => NodeKind::WhatsappMessage,
            Self::TelegramMessage(_) => NodeKind::TelegramMessage,
            Self::NewContact(_) => NodeKind::NewContact,
            Self::Scheduled(_) => NodeKind::Scheduled,
            Self::WebhookTrigger(_) => NodeKind::WebhookTrigger,
            Self::Condition(_) => NodeKind::Condition,
            Self::Loop(_) => NodeKind::Loop,
            Self::SetVariable(_) => NodeKind::SetVariable,
            Self::RandomChoice(_) => NodeKind::RandomChoice,
            Self::EndFlow(_) => NodeKind::EndFlow,
        }
    }

    /// Parses and validates an untagged config value for the given type.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not deserialize under the type's
    /// schema or fails a semantic rule.
    pub fn from_value(kind: NodeKind, value: JsonValue) -> Result<Self, ConfigError> {
        let config = match kind {
            NodeKind::Keyword => Self::Keyword(parse_as(kind, value)?),
            NodeKind::WhatsappMessage => Self::WhatsappMessage(parse_as(kind, value)?),
            NodeKind::TelegramMessage => Self::TelegramMessage(parse_as(kind, value)?),
            NodeKind::NewContact => Self::NewContact(parse_as(kind, value)?),
            NodeKind::Scheduled => Self::Scheduled(parse_as(kind, value)?),
            NodeKind::WebhookTrigger => Self::WebhookTrigger(parse_as(kind, value)?),
            NodeKind::Condition => Self::Condition(parse_as(kind, value)?),
            NodeKind::Loop => Self::Loop(parse_as(kind, value)?),
            NodeKind::SetVariable => Self::SetVariable(parse_as(kind, value)?),
            NodeKind::RandomChoice => Self::RandomChoice(parse_as(kind, value)?),
            NodeKind::EndFlow => Self::EndFlow(parse_as(kind, value)?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a raw JSON string for the given type. An empty
    /// string reads as `{}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not JSON, does not deserialize
    /// under the type's schema, or fails a semantic rule.
    pub fn from_raw(kind: NodeKind, raw: &str) -> Result<Self, ConfigError> {
        let raw = if raw.trim().is_empty() { "{}" } else { raw };
        let value: JsonValue = serde_json::from_str(raw).map_err(|e| ConfigError::Malformed {
            kind,
            reason: e.to_string(),
        })?;
        Self::from_value(kind, value)
    }

    /// Serializes the config payload without its type tag.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<JsonValue, ConfigError> {
        let kind = self.kind();
        match self {
            Self::Keyword(c) => serialize_as(kind, c),
            Self::WhatsappMessage(c) | Self::TelegramMessage(c) => serialize_as(kind, c),
            Self::NewContact(c) => serialize_as(kind, c),
            Self::Scheduled(c) => serialize_as(kind, c),
            Self::WebhookTrigger(c) => serialize_as(kind, c),
            Self::Condition(c) => serialize_as(kind, c),
            Self::Loop(c) => serialize_as(kind, c),
            Self::SetVariable(c) => serialize_as(kind, c),
            Self::RandomChoice(c) => serialize_as(kind, c),
            Self::EndFlow(c) => serialize_as(kind, c),
        }
    }

    /// Serializes the config payload to the persisted JSON string form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_raw(&self) -> Result<String, ConfigError> {
        let value = self.to_value()?;
        serde_json::to_string(&value).map_err(|e| ConfigError::Malformed {
            kind: self.kind(),
            reason: e.to_string(),
        })
    }

    /// Checks the semantic rules for this config.
    ///
    /// # Errors
    ///
    /// Returns the first rule violation for this node.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            kind: self.kind(),
            reason,
        };
        match self {
            Self::Keyword(c) => {
                if c.keywords().next().is_none() {
                    return Err(invalid("keyword list is empty".to_string()));
                }
            }
            Self::WhatsappMessage(_) | Self::TelegramMessage(_) | Self::NewContact(_) => {}
            Self::Scheduled(mode) => match mode {
                ScheduleMode::Interval { interval_value, .. } => {
                    if *interval_value == 0 {
                        return Err(invalid("interval value must be at least 1".to_string()));
                    }
                }
                ScheduleMode::Cron { expression, .. } => {
                    let fields = expression.split_whitespace().count();
                    if fields != 5 {
                        return Err(invalid(format!(
                            "cron expression must have 5 fields, got {fields}"
                        )));
                    }
                }
                ScheduleMode::Once { .. } => {}
            },
            Self::WebhookTrigger(c) => {
                if c.secret.as_deref() == Some("") {
                    return Err(invalid("webhook secret must not be empty".to_string()));
                }
            }
            Self::Condition(c) => validate_condition(c).map_err(invalid)?,
            Self::Loop(c) => {
                if c.max_iterations == 0 {
                    return Err(invalid("maxIterations must be at least 1".to_string()));
                }
                match &c.loop_type {
                    LoopType::Array { variable, .. } => {
                        if variable.trim().is_empty() {
                            return Err(invalid("array loop variable is empty".to_string()));
                        }
                    }
                    LoopType::While { condition } => {
                        validate_condition(condition).map_err(invalid)?;
                    }
                    LoopType::Count { .. } => {}
                }
            }
            Self::SetVariable(c) => {
                if c.assignments.is_empty() {
                    return Err(invalid("set_variable has no assignments".to_string()));
                }
                for assignment in &c.assignments {
                    if assignment.name.trim().is_empty() {
                        return Err(invalid("assignment name is empty".to_string()));
                    }
                    if let AssignmentSource::Expression { expression } = &assignment.source {
                        crate::expr::parse(expression)
                            .map_err(|e| invalid(format!("expression: {e}")))?;
                    }
                }
            }
            Self::RandomChoice(c) => {
                if c.choices.is_empty() {
                    return Err(invalid("random_choice has no choices".to_string()));
                }
                for choice in &c.choices {
                    if choice.name.trim().is_empty() {
                        return Err(invalid("choice name is empty".to_string()));
                    }
                    if c.weighted && choice.weight == 0 {
                        return Err(invalid(format!(
                            "choice '{}' has zero weight",
                            choice.name
                        )));
                    }
                }
            }
            Self::EndFlow(c) => {
                if let EndFlowConfig::Message { message } = c
                    && message.trim().is_empty()
                {
                    return Err(invalid("end_flow message is empty".to_string()));
                }
            }
        }
        Ok(())
    }
}

fn validate_condition(config: &ConditionConfig) -> Result<(), String> {
    if !config.operator.is_unary() && config.value.is_empty() {
        return Err("condition value is empty".to_string());
    }
    if config.operator == ConditionOperator::MatchesRegex {
        regex::Regex::new(&config.value).map_err(|e| format!("bad regex: {e}"))?;
    }
    if let ConditionField::Variable { name } = &config.field
        && name.trim().is_empty()
    {
        return Err("condition variable name is empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_lines_trimmed() {
        let config = KeywordConfig {
            keywords: "devis\n  prix  \n\n".to_string(),
        };
        let keywords: Vec<_> = config.keywords().collect();
        assert_eq!(keywords, vec!["devis", "prix"]);
    }

    #[test]
    fn empty_keyword_list_rejected() {
        let result = NodeConfig::from_raw(NodeKind::Keyword, r#"{"keywords":"\n  \n"}"#);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn schedule_interval_parses_camel_case() {
        let config = NodeConfig::from_raw(
            NodeKind::Scheduled,
            r#"{"mode":"interval","intervalValue":2,"intervalUnit":"hours"}"#,
        )
        .expect("should parse");
        match config {
            NodeConfig::Scheduled(ScheduleMode::Interval {
                interval_value,
                interval_unit,
            }) => {
                assert_eq!(interval_value, 2);
                assert_eq!(interval_unit, IntervalUnit::Hours);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn cron_field_count_checked() {
        let result = NodeConfig::from_raw(
            NodeKind::Scheduled,
            r#"{"mode":"cron","expression":"0 7 * *"}"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn webhook_method_defaults_to_any() {
        let config = NodeConfig::from_raw(NodeKind::WebhookTrigger, "{}").expect("should parse");
        match config {
            NodeConfig::WebhookTrigger(c) => assert_eq!(c.method, HttpMethod::Any),
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn bad_regex_rejected() {
        let result = NodeConfig::from_raw(
            NodeKind::Condition,
            r#"{"field":"message","operator":"matches_regex","value":"["}"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn loop_flattens_loop_type() {
        let config = NodeConfig::from_raw(
            NodeKind::Loop,
            r#"{"loopType":"count","count":5,"delayBetween":3,"maxIterations":10}"#,
        )
        .expect("should parse");
        match config {
            NodeConfig::Loop(c) => {
                assert_eq!(c.loop_type, LoopType::Count { count: 5 });
                assert_eq!(c.delay_between, 3);
                assert_eq!(c.max_iterations, 10);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn loop_max_iterations_defaults() {
        let config =
            NodeConfig::from_raw(NodeKind::Loop, r#"{"loopType":"count","count":5}"#)
                .expect("should parse");
        match config {
            NodeConfig::Loop(c) => assert_eq!(c.max_iterations, 100),
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn set_variable_expression_checked_at_parse_time() {
        let result = NodeConfig::from_raw(
            NodeKind::SetVariable,
            r#"{"assignments":[{"name":"a","type":"expression","expression":"1 +"}]}"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn weighted_choice_rejects_zero_weight() {
        let result = NodeConfig::from_raw(
            NodeKind::RandomChoice,
            r#"{"choices":[{"name":"a","weight":0},{"name":"b","weight":9}],"weighted":true}"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn unweighted_choices_weigh_one() {
        let config = RandomChoiceConfig {
            choices: vec![
                Choice {
                    name: "a".to_string(),
                    weight: 10,
                },
                Choice {
                    name: "b".to_string(),
                    weight: 90,
                },
            ],
            weighted: false,
        };
        assert_eq!(config.total_weight(), 2);
    }

    #[test]
    fn extreme_weights_sum_without_overflow() {
        let config = RandomChoiceConfig {
            choices: vec![
                Choice {
                    name: "a".to_string(),
                    weight: u32::MAX,
                },
                Choice {
                    name: "b".to_string(),
                    weight: u32::MAX,
                },
            ],
            weighted: true,
        };
        assert_eq!(config.total_weight(), 2 * u64::from(u32::MAX));
    }

    #[test]
    fn end_flow_action_tag() {
        let config = NodeConfig::from_raw(NodeKind::EndFlow, r#"{"action":"stop"}"#)
            .expect("should parse");
        assert_eq!(config, NodeConfig::EndFlow(EndFlowConfig::Stop));

        let config = NodeConfig::from_raw(
            NodeKind::EndFlow,
            r#"{"action":"message","message":"Priorité haute"}"#,
        )
        .expect("should parse");
        match config {
            NodeConfig::EndFlow(EndFlowConfig::Message { message }) => {
                assert_eq!(message, "Priorité haute");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn config_value_roundtrip() {
        let config = NodeConfig::Condition(ConditionConfig {
            field: ConditionField::Variable {
                name: "score".to_string(),
            },
            operator: ConditionOperator::GreaterThan,
            value: "10".to_string(),
        });
        let value = config.to_value().expect("to_value");
        let parsed = NodeConfig::from_value(NodeKind::Condition, value).expect("from_value");
        assert_eq!(config, parsed);
    }

    #[test]
    fn raw_roundtrip_through_string() {
        let config = NodeConfig::Loop(LoopConfig {
            loop_type: LoopType::Array {
                variable: "items".to_string(),
                item_variable: None,
            },
            delay_between: 0,
            max_iterations: 100,
        });
        let raw = config.to_raw().expect("to_raw");
        let parsed = NodeConfig::from_raw(NodeKind::Loop, &raw).expect("from_raw");
        assert_eq!(config, parsed);
    }
}
