//! Response chunks streamed from agents to callers
//!
//! A chunk is either a delta (partial text fields, partial JSON fields and
//! optional token usage) or a progress event. Never both.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;

/// Token counts reported by a model-bearing agent for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Create a usage record
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input + output tokens
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Partial output of an agent
///
/// `text` fields are incremental and appended to what the caller already
/// holds; `json` fields replace the previous value of the same key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaChunk {
    /// Partial text fields, appended per key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<BTreeMap<String, String>>,

    /// Partial structured fields, overwritten per key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Message>,

    /// Token usage consumed by the hop that produced this chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl DeltaChunk {
    /// Whether the delta carries nothing at all
    pub fn is_empty(&self) -> bool {
        self.text.as_ref().map_or(true, |t| t.is_empty())
            && self.json.as_ref().map_or(true, |j| j.is_empty())
            && self.usage.is_none()
    }
}

/// What happened to an agent call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    /// The agent started processing
    Start {
        /// Input the agent received
        input: Message,
    },
    /// The agent finished successfully
    End {
        /// Resolved output of the call
        output: Message,
    },
    /// The agent failed
    Failed {
        /// Error description
        error: String,
    },
}

/// Lifecycle event of one agent call, surfaced to streaming callers on request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressChunk {
    /// Id of the agent call this event belongs to
    pub task_id: String,
    /// Id of the Context that ran the call
    pub context_id: String,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Name of the agent
    pub agent: String,
    /// Start or end payload
    pub event: ProgressEvent,
}

/// One unit of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentResponseChunk {
    /// Partial field delta
    Delta(DeltaChunk),
    /// Progress event
    Progress(ProgressChunk),
}

impl AgentResponseChunk {
    /// Create a text delta for a single field
    pub fn text(key: impl Into<String>, text: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(key.into(), text.into());
        AgentResponseChunk::Delta(DeltaChunk {
            text: Some(fields),
            ..Default::default()
        })
    }

    /// Create a JSON delta carrying several fields
    pub fn json(fields: Message) -> Self {
        AgentResponseChunk::Delta(DeltaChunk {
            json: Some(fields),
            ..Default::default()
        })
    }

    /// Create a JSON delta for one field
    pub fn field(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = Message::new();
        fields.insert(key.into(), value.into());
        Self::json(fields)
    }

    /// Create a usage-only delta
    pub fn usage(usage: TokenUsage) -> Self {
        AgentResponseChunk::Delta(DeltaChunk {
            usage: Some(usage),
            ..Default::default()
        })
    }

    /// Check if this is a progress chunk
    pub fn is_progress(&self) -> bool {
        matches!(self, AgentResponseChunk::Progress(_))
    }

    /// Borrow the delta, if this is one
    pub fn as_delta(&self) -> Option<&DeltaChunk> {
        match self {
            AgentResponseChunk::Delta(delta) => Some(delta),
            AgentResponseChunk::Progress(_) => None,
        }
    }

    /// Whether the chunk carries nothing worth forwarding
    pub fn is_empty(&self) -> bool {
        match self {
            AgentResponseChunk::Delta(delta) => delta.is_empty(),
            AgentResponseChunk::Progress(_) => false,
        }
    }
}

impl From<DeltaChunk> for AgentResponseChunk {
    fn from(delta: DeltaChunk) -> Self {
        AgentResponseChunk::Delta(delta)
    }
}

impl From<ProgressChunk> for AgentResponseChunk {
    fn from(progress: ProgressChunk) -> Self {
        AgentResponseChunk::Progress(progress)
    }
}
