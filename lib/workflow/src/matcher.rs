//! Matching inbound events to the workflows they should start.
//!
//! The index is built from active workflows only; drafts never match.
//! Message events may start several workflows at once; webhook calls
//! resolve to exactly one endpoint or are rejected before the engine is
//! ever involved.

use crate::config::NodeConfig;
use crate::error::WebhookError;
use crate::event::{Channel, MessageEvent, WebhookRequest};
use crate::node::{NodeId, NodeKind};
use flowbot_core::{ChannelAccountId, TriggerId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Connection state of channel accounts, owned by the host.
pub trait ChannelRegistry {
    /// Whether the account is currently connected on the channel.
    fn is_connected(&self, channel: Channel, account_id: ChannelAccountId) -> bool;
}

/// A channel registry backed by a plain set, for hosts that track
/// connections elsewhere and for tests.
#[derive(Debug, Clone, Default)]
pub struct ConnectedChannels {
    connected: HashSet<(Channel, ChannelAccountId)>,
}

impl ConnectedChannels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, channel: Channel, account_id: ChannelAccountId) {
        self.connected.insert((channel, account_id));
    }

    pub fn disconnect(&mut self, channel: Channel, account_id: ChannelAccountId) {
        self.connected.remove(&(channel, account_id));
    }
}

impl ChannelRegistry for ConnectedChannels {
    fn is_connected(&self, channel: Channel, account_id: ChannelAccountId) -> bool {
        self.connected.contains(&(channel, account_id))
    }
}

/// One trigger that matched an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMatch {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
}

/// A denormalized trigger row: one per trigger node of an active
/// workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRecord {
    pub id: TriggerId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub config: NodeConfig,
}

impl TriggerRecord {
    fn to_match(&self) -> TriggerMatch {
        TriggerMatch {
            workflow_id: self.workflow_id,
            node_id: self.node_id,
        }
    }
}

/// The live trigger index over all active workflows.
#[derive(Debug, Clone, Default)]
pub struct TriggerIndex {
    records: Vec<TriggerRecord>,
    /// Webhook endpoints are keyed by node id; node ids come from one
    /// global sequence, so the key is unambiguous across workflows.
    by_webhook: HashMap<NodeId, usize>,
}

impl TriggerIndex {
    /// Builds the index from a workflow set, skipping drafts.
    #[must_use]
    pub fn from_workflows(workflows: &[crate::definition::Workflow]) -> Self {
        let mut index = Self::default();
        for workflow in workflows {
            if !workflow.is_active() {
                continue;
            }
            for node in workflow.nodes() {
                if !node.is_trigger() {
                    continue;
                }
                index.insert(TriggerRecord {
                    id: TriggerId::new(),
                    workflow_id: workflow.id(),
                    node_id: node.id,
                    kind: node.kind(),
                    config: node.config.clone(),
                });
            }
        }
        index
    }

    pub fn insert(&mut self, record: TriggerRecord) {
        if record.kind == NodeKind::WebhookTrigger {
            self.by_webhook.insert(record.node_id, self.records.len());
        }
        self.records.push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All matches for an inbound message. A single message may start
    /// several workflows.
    #[must_use]
    pub fn match_message(
        &self,
        event: &MessageEvent,
        channels: &dyn ChannelRegistry,
    ) -> Vec<TriggerMatch> {
        let matches: Vec<TriggerMatch> = self
            .records
            .iter()
            .filter(|record| Self::message_matches(record, event, channels))
            .map(TriggerRecord::to_match)
            .collect();
        debug!(
            sender = %event.sender_id,
            channel = %event.channel,
            matched = matches.len(),
            "message matched against trigger index"
        );
        matches
    }

    fn message_matches(
        record: &TriggerRecord,
        event: &MessageEvent,
        channels: &dyn ChannelRegistry,
    ) -> bool {
        match &record.config {
            NodeConfig::Keyword(config) => {
                let text = event.text.to_lowercase();
                config.keywords().any(|k| text.contains(&k.to_lowercase()))
            }
            NodeConfig::WhatsappMessage(config) => {
                event.channel == Channel::Whatsapp
                    && event.account_id == config.account_id
                    && channels.is_connected(Channel::Whatsapp, config.account_id)
            }
            NodeConfig::TelegramMessage(config) => {
                event.channel == Channel::Telegram
                    && event.account_id == config.account_id
                    && channels.is_connected(Channel::Telegram, config.account_id)
            }
            NodeConfig::NewContact(config) => {
                event.first_contact
                    && config
                        .account_id
                        .is_none_or(|account| account == event.account_id)
            }
            _ => false,
        }
    }

    /// Resolves an inbound webhook call to its endpoint.
    ///
    /// # Errors
    ///
    /// Returns a rejection reason for the HTTP boundary to report; the
    /// engine is never invoked for a rejected call.
    pub fn match_webhook(&self, request: &WebhookRequest) -> Result<TriggerMatch, WebhookError> {
        let record = self
            .by_webhook
            .get(&request.node_id)
            .map(|&i| &self.records[i])
            .ok_or(WebhookError::UnknownEndpoint {
                node_id: request.node_id,
            })?;
        let NodeConfig::WebhookTrigger(config) = &record.config else {
            return Err(WebhookError::UnknownEndpoint {
                node_id: request.node_id,
            });
        };
        if !config.method.accepts(request.method) {
            return Err(WebhookError::MethodNotAllowed {
                node_id: record.node_id,
                method: request.method.to_string(),
            });
        }
        if let Some(expected) = &config.secret
            && request.secret.as_deref() != Some(expected.as_str())
        {
            return Err(WebhookError::SecretMismatch {
                node_id: record.node_id,
            });
        }
        Ok(record.to_match())
    }

    /// The scheduled triggers a timer evaluator should drive.
    pub fn scheduled_triggers(&self) -> impl Iterator<Item = &TriggerRecord> {
        self.records
            .iter()
            .filter(|record| record.kind == NodeKind::Scheduled)
    }
}
