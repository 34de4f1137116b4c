//! Inbound events that start or feed a run.

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use flowbot_core::ChannelAccountId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Messaging channels the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Telegram,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Telegram => write!(f, "telegram"),
        }
    }
}

/// HTTP methods a webhook trigger can accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Get,
    Put,
    #[default]
    Any,
}

impl HttpMethod {
    /// Whether a configured method accepts an incoming one.
    #[must_use]
    pub fn accepts(&self, incoming: HttpMethod) -> bool {
        *self == Self::Any || *self == incoming
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Post => write!(f, "POST"),
            Self::Get => write!(f, "GET"),
            Self::Put => write!(f, "PUT"),
            Self::Any => write!(f, "ANY"),
        }
    }
}

/// Where a reply to a message event should go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAddress {
    pub channel: Channel,
    pub account_id: ChannelAccountId,
    pub contact: String,
}

/// An inbound channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub channel: Channel,
    pub account_id: ChannelAccountId,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub contact_tags: Vec<String>,
    /// True when this is the contact's first message to the account.
    #[serde(default)]
    pub first_contact: bool,
    /// Sentiment label computed upstream, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
}

impl MessageEvent {
    /// The address replies to this message should be sent to.
    #[must_use]
    pub fn address(&self) -> MessageAddress {
        MessageAddress {
            channel: self.channel,
            account_id: self.account_id,
            contact: self.sender_id.clone(),
        }
    }
}

/// An inbound webhook call, already routed to its endpoint node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub node_id: NodeId,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default)]
    pub body: JsonValue,
}

/// The event that started a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    Message(MessageEvent),
    Schedule { fired_at: DateTime<Utc> },
    Webhook { body: JsonValue },
}

impl TriggerEvent {
    /// The message event, when this run was message-triggered.
    #[must_use]
    pub fn message(&self) -> Option<&MessageEvent> {
        match self {
            Self::Message(event) => Some(event),
            _ => None,
        }
    }

    /// Where outbound messages from this run should go, when known.
    #[must_use]
    pub fn reply_address(&self) -> Option<MessageAddress> {
        self.message().map(MessageEvent::address)
    }
}
