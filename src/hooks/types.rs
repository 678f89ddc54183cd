//! Hook Types
//!
//! Core types for the hooks system:
//! - `HookEvent` - The point in an agent call the hook fires at
//! - `HookContext` - Context passed to hooks

use crate::core::{Message, RuntimeError};
use crate::runtime::Context;

/// Hook event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Before `process` runs - may rewrite the input
    AgentStart,
    /// After `process` finished, successfully or not
    AgentEnd,
    /// The agent handed the call off to another agent
    Handoff,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::AgentStart => write!(f, "AgentStart"),
            HookEvent::AgentEnd => write!(f, "AgentEnd"),
            HookEvent::Handoff => write!(f, "Handoff"),
        }
    }
}

/// Context passed to hooks
///
/// Only `input` is writable, and only an `AgentStart` rewrite has any
/// effect on the call.
pub struct HookContext<'a> {
    /// The hook event type
    pub event: HookEvent,

    /// Context running the agent call
    pub context: &'a Context,

    /// Name of the agent the hook belongs to (the source, for handoffs)
    pub agent: &'a str,

    /// Input of the call
    pub input: Message,

    /// Resolved output (for successful `AgentEnd`)
    pub output: Option<&'a Message>,

    /// Failure (for failed `AgentEnd`)
    pub error: Option<&'a RuntimeError>,

    /// Name of the agent receiving the call (for `Handoff`)
    pub target: Option<&'a str>,
}

impl<'a> HookContext<'a> {
    /// Create context for an AgentStart hook
    pub fn agent_start(context: &'a Context, agent: &'a str, input: Message) -> Self {
        Self {
            event: HookEvent::AgentStart,
            context,
            agent,
            input,
            output: None,
            error: None,
            target: None,
        }
    }

    /// Create context for a successful AgentEnd hook
    pub fn agent_end(context: &'a Context, agent: &'a str, input: Message, output: &'a Message) -> Self {
        Self {
            event: HookEvent::AgentEnd,
            context,
            agent,
            input,
            output: Some(output),
            error: None,
            target: None,
        }
    }

    /// Create context for a failed AgentEnd hook
    pub fn agent_failed(
        context: &'a Context,
        agent: &'a str,
        input: Message,
        error: &'a RuntimeError,
    ) -> Self {
        Self {
            event: HookEvent::AgentEnd,
            context,
            agent,
            input,
            output: None,
            error: Some(error),
            target: None,
        }
    }

    /// Create context for a Handoff hook
    pub fn handoff(context: &'a Context, source: &'a str, target: &'a str, input: Message) -> Self {
        Self {
            event: HookEvent::Handoff,
            context,
            agent: source,
            input,
            output: None,
            error: None,
            target: Some(target),
        }
    }

    /// Name the matcher pattern is tested against
    pub fn subject(&self) -> &str {
        match self.event {
            HookEvent::Handoff => self.target.unwrap_or(self.agent),
            _ => self.agent,
        }
    }

    /// Id of the Context running the call
    pub fn context_id(&self) -> &str {
        self.context.id()
    }
}
