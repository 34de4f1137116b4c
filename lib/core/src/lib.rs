//! Core domain types and utilities for flowbot.
//!
//! This crate provides the foundational types and error handling used
//! throughout the flowbot messaging-automation engine.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ChannelAccountId, ParseIdError, TriggerId, WorkflowId, WorkflowRunId};
