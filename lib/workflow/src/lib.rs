//! Workflow definition, validation, and execution.
//!
//! A workflow is a graph of typed nodes: one trigger plus condition,
//! loop, variable, random-choice, and terminal nodes wired through
//! labeled edges. This crate owns the node model and its per-type
//! configs, the graph validator, the editor codec, the trigger matcher,
//! and the pure execution engine. All I/O is the host's: the engine
//! emits effect requests and serializable suspensions instead of
//! performing anything itself.

pub mod codec;
pub mod config;
pub mod context;
pub mod definition;
pub mod effect;
pub mod engine;
pub mod error;
pub mod event;
pub mod expr;
pub mod graph;
pub mod matcher;
pub mod node;
pub mod registry;
pub mod run;

pub use codec::{RenderEdge, RenderGraph, RenderNode, from_renderable, to_renderable};
pub use config::NodeConfig;
pub use context::{RunContext, VarValue};
pub use definition::{Workflow, WorkflowState, WorkflowSummary};
pub use effect::EffectRequest;
pub use engine::{CancelFlag, Engine, EngineOptions, RunOutcome, RunStatus, SuspendedRun};
pub use error::{CodecError, ConfigError, RunError, RunWarning, ValidationError, WebhookError};
pub use event::{Channel, HttpMethod, MessageEvent, TriggerEvent, WebhookRequest};
pub use graph::{FlowGraph, validate_nodes};
pub use matcher::{ChannelRegistry, ConnectedChannels, TriggerIndex, TriggerMatch, TriggerRecord};
pub use node::{EdgeLabel, NodeId, NodeKind, Position, WorkflowNode};
pub use registry::{Evaluation, TerminationKind, evaluate};
pub use run::{RunRecord, RunState};
