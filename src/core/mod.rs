//! Core types for the invocation runtime
//!
//! This module provides the leaf data types used throughout the crate:
//! - `Message` - Open key/value record exchanged with agents
//! - `AgentResponseChunk` - Delta or progress unit of a streamed response
//! - `ContextUsage` / `ContextLimits` / `UsageLedger` - Lineage accounting
//! - `ContextStatus` - Normal or timed out
//! - `RuntimeError` - Error types

pub mod chunk;
pub mod error;
pub mod message;
pub mod state;
pub mod usage;

pub use chunk::{AgentResponseChunk, DeltaChunk, ProgressChunk, ProgressEvent, TokenUsage};
pub use error::{RuntimeError, RuntimeResult};
pub use message::{merge_into, text_message, to_message, Message, META_KEY};
pub use state::ContextStatus;
pub use usage::{ContextLimits, ContextUsage, UsageLedger};
