//! Runtime error types

use thiserror::Error;

/// Errors that can occur while dispatching and supervising agent calls
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Missing required agent/model or malformed invoke arguments
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Input that an agent or the runtime cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The lineage made more agent calls than `max_agent_invokes` allows
    #[error("Exceeded max agent invokes {used}/{max}")]
    MaxAgentInvokesExceeded {
        /// Calls already made in the lineage
        used: u64,
        /// Configured ceiling
        max: u64,
    },

    /// The lineage consumed more tokens than `max_tokens` allows
    #[error("Exceeded max tokens {used}/{max}")]
    MaxTokensExceeded {
        /// Input + output tokens consumed in the lineage
        used: u64,
        /// Configured ceiling
        max: u64,
    },

    /// The lineage abort signal fired before the next chunk was available
    #[error("Context is timeout")]
    Timeout,

    /// An agent's own logic failed
    #[error("Agent '{agent}' failed: {message}")]
    AgentFailed {
        /// Name of the failing agent
        agent: String,
        /// Error description
        message: String,
    },

    /// A model asked for a tool the agent does not have
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A handoff named an agent that is neither a skill nor in the context pool
    #[error("Transfer target not found: {0}")]
    TransferTargetNotFound(String),

    /// Memory store failure
    #[error("Memory error: {0}")]
    Memory(String),

    /// Channel closed unexpectedly
    #[error("Channel closed")]
    ChannelClosed,

    /// The invoke ended before the final active agent was known
    #[error("Active agent unavailable: invoke ended without resolving an agent")]
    ActiveAgentUnavailable,

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else bubbling up from collaborator code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        RuntimeError::Configuration(msg.into())
    }

    /// Wrap a failure raised by an agent's own logic.
    ///
    /// Runtime errors that travelled through `anyhow` (for example a nested
    /// invoke hitting a limit inside a closure) keep their original variant.
    pub fn agent(agent: impl Into<String>, err: anyhow::Error) -> Self {
        match err.downcast::<RuntimeError>() {
            Ok(inner) => inner,
            Err(err) => RuntimeError::AgentFailed {
                agent: agent.into(),
                message: format!("{err:#}"),
            },
        }
    }

    /// Whether this error terminates the whole lineage rather than one call
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(
            self,
            RuntimeError::MaxAgentInvokesExceeded { .. } | RuntimeError::MaxTokensExceeded { .. }
        )
    }

    /// Whether this error came from the lineage abort signal
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout)
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
