//! Invocation runtime
//!
//! This module provides the orchestration around agent calls:
//! - `Context` - Per-invocation node of a lineage; entry point for invoke,
//!   publish and subscribe
//! - `InvokeOptions` / `InvokeResponse` - Shape of an invoke and its result
//! - `ContextEvent` / `Observer` - Lifecycle events of every agent call
//! - Channel types for streaming agents and lifecycle events
//!
//! An invoke derives a child Context, then runs hops (one agent call each)
//! until no handoff is requested. Every step is raced against the lineage's
//! abort signal and checked against its usage limits.

pub mod abort;
pub mod channels;
pub mod context;
pub mod events;
mod hop;
pub mod invoke;
mod lineage;
mod progress;
mod transfer;

pub use abort::AbortSignal;
pub use channels::{create_chunk_channel, ChunkSender, EventReceiver};
pub use context::{Context, ContextBuilder, PublishOptions};
pub use events::{ContextEvent, ContextEventKind, LogObserver, Observer};
pub use invoke::{ActiveAgentHandle, InvokeOptions, InvokeOutput, InvokeResponse, InvokeStream};
