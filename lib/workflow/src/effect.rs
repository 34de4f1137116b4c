//! Side effects a run asks its host to perform.
//!
//! The engine itself never performs I/O. It returns a list of effect
//! requests with the run outcome, and the host decides how (and whether)
//! to carry them out.

use crate::context::RunContext;
use crate::event::MessageAddress;
use flowbot_core::WorkflowId;
use serde::{Deserialize, Serialize};

/// One effect requested by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectRequest {
    /// Send a channel message. `to` is `None` when the run has no reply
    /// address (schedule- or webhook-triggered); the host decides the
    /// destination in that case.
    SendMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<MessageAddress>,
        text: String,
    },
    /// Start another workflow, carrying the current context over.
    StartWorkflow {
        workflow_id: WorkflowId,
        context: Box<RunContext>,
    },
}
