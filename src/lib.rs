//! Agent invocation runtime
//!
//! Dispatches calls to agents, follows handoffs between them, streams their
//! partial output and enforces lineage-wide usage limits and timeouts.
//!
//! ```ignore
//! let ctx = Context::builder()
//!     .with_limits(ContextLimits::new().with_max_agent_invokes(10))
//!     .build();
//! let output = ctx.invoke(&agent, text_message("message", "hello")).await?;
//! ```

pub mod core;
pub mod runtime;
pub mod stream;

// Agents and what the runtime runs around them
pub mod agent;
pub mod hooks;

// Publish/subscribe between agents
pub mod queue;

// Ambient setup
pub mod config;
pub mod logging;

pub use agent::{
    Agent, AgentOutput, AgentRef, AgentStream, AgentStreamItem, FunctionAgent, ModelAgent,
    ProcessMode, ProcessOutput, TeamAgent, ToolChoice, TransferTarget, UserAgent,
};
pub use config::{LogConfig, RuntimeConfig};
pub use core::{
    text_message, to_message, AgentResponseChunk, ContextLimits, ContextStatus, ContextUsage,
    DeltaChunk, Message, RuntimeError, RuntimeResult, TokenUsage,
};
pub use queue::{MessageQueue, TopicBinding, Topics};
pub use runtime::{Context, InvokeOptions, InvokeOutput, InvokeResponse, InvokeStream};
pub use stream::{collect_message, ChunkStream, ResponseAccumulator};
