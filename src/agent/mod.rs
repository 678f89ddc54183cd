//! Agent contract and the concrete agent variants
//!
//! Every unit of work implements [`Agent`]. The runtime only ever holds
//! agents as [`AgentRef`] (`Arc<dyn Agent>`) and dispatches through the
//! trait; the closed set of implementors shipped here is:
//! - `FunctionAgent` - closure-backed
//! - `ModelAgent` - asks a model agent, runs tools, routes
//! - `TeamAgent` - sequential or parallel composition of skills
//! - `UserAgent` - persistent proxy bound to one agent and one Context
//!
//! An agent either finishes with an [`AgentOutput`] or streams
//! [`AgentStreamItem`]s. A handoff is a typed variant in both forms, so a
//! transfer marker can never end up inside a caller-visible `Message`.

pub mod function;
pub mod memory;
pub mod model;
pub mod team;
pub mod user;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::{AgentResponseChunk, Message, RuntimeResult};
use crate::hooks::HookRegistry;
use crate::runtime::Context;

pub use function::FunctionAgent;
pub use memory::{Memory, MemoryAddOptions, MemorySearchOptions, MemorySearchResult, MemoryStore};
pub use model::{ModelAgent, ToolChoice};
pub use team::{ProcessMode, TeamAgent};
pub use user::UserAgent;

/// Shared handle to an agent
pub type AgentRef = Arc<dyn Agent>;

/// Where a handoff sends the call
#[derive(Clone)]
pub enum TransferTarget {
    /// A concrete agent
    Agent(AgentRef),
    /// An agent looked up by name among the outgoing agent's skills, then the
    /// context's skill pool
    Named(String),
}

impl TransferTarget {
    /// Name of the target agent
    pub fn name(&self) -> &str {
        match self {
            TransferTarget::Agent(agent) => agent.name(),
            TransferTarget::Named(name) => name,
        }
    }
}

impl fmt::Debug for TransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferTarget::Agent(agent) => f.debug_tuple("Agent").field(&agent.name()).finish(),
            TransferTarget::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// Final result of a non-streaming `process`
#[derive(Debug, Clone)]
pub enum AgentOutput {
    /// Finished output
    Message(Message),
    /// Do not finalize; re-run the same input against another agent
    Transfer(TransferTarget),
}

impl AgentOutput {
    /// Hand off to a concrete agent
    pub fn transfer_to(agent: AgentRef) -> Self {
        AgentOutput::Transfer(TransferTarget::Agent(agent))
    }

    /// Hand off to an agent resolved by name
    pub fn transfer_to_named(name: impl Into<String>) -> Self {
        AgentOutput::Transfer(TransferTarget::Named(name.into()))
    }
}

impl From<Message> for AgentOutput {
    fn from(message: Message) -> Self {
        AgentOutput::Message(message)
    }
}

/// One item of a streaming `process`
#[derive(Debug, Clone)]
pub enum AgentStreamItem {
    /// Partial output or progress
    Chunk(AgentResponseChunk),
    /// Hand the call off once the stream ends; chunks already sent are kept
    Transfer(TransferTarget),
}

impl From<AgentResponseChunk> for AgentStreamItem {
    fn from(chunk: AgentResponseChunk) -> Self {
        AgentStreamItem::Chunk(chunk)
    }
}

/// Stream produced by a streaming agent
pub type AgentStream = BoxStream<'static, RuntimeResult<AgentStreamItem>>;

/// What `process` hands back to the runtime
pub enum ProcessOutput {
    /// The agent finished in one step
    Output(AgentOutput),
    /// The agent streams its output
    Stream(AgentStream),
}

impl From<AgentOutput> for ProcessOutput {
    fn from(output: AgentOutput) -> Self {
        ProcessOutput::Output(output)
    }
}

impl From<Message> for ProcessOutput {
    fn from(message: Message) -> Self {
        ProcessOutput::Output(AgentOutput::Message(message))
    }
}

impl From<AgentStream> for ProcessOutput {
    fn from(stream: AgentStream) -> Self {
        ProcessOutput::Stream(stream)
    }
}

impl fmt::Debug for ProcessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutput::Output(output) => f.debug_tuple("Output").field(output).finish(),
            ProcessOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A named, polymorphic unit of work
///
/// Implementors only describe what they produce. Call counting, limits,
/// memory lookups, hooks, lifecycle events and handoffs are handled by the
/// runtime around `process`, so agents should be invoked through
/// [`Context::invoke`](crate::runtime::Context::invoke), never by calling
/// `process` directly.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique name, used for handoff lookup and tracing
    fn name(&self) -> &str;

    /// Human-readable description (sent to models as the tool description)
    fn description(&self) -> Option<&str> {
        None
    }

    /// Sub-agents this agent may call as tools or hand off to
    fn skills(&self) -> &[AgentRef] {
        &[]
    }

    /// Memory store consulted before and updated after each call
    fn memory(&self) -> Option<&Arc<dyn MemoryStore>> {
        None
    }

    /// Lifecycle hooks
    fn hooks(&self) -> Option<&HookRegistry> {
        None
    }

    /// Produce output for `input`
    async fn process(&self, input: Message, context: Context) -> RuntimeResult<ProcessOutput>;
}

impl fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Agent").field(&self.name()).finish()
    }
}

/// Find a skill by name
pub fn find_skill<'a>(skills: &'a [AgentRef], name: &str) -> Option<&'a AgentRef> {
    skills.iter().find(|skill| skill.name() == name)
}
