//! Memory store seam
//!
//! Concrete stores (vector databases, files, ...) live outside this crate.
//! The runtime calls `search` before an agent's `process` and `add` after a
//! successful one; the results of `search` are appended to the lineage's
//! memories where the agent (and any nested call) can read them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Message;

/// One remembered item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Store-assigned id
    pub id: String,
    /// Remembered content
    pub content: Value,
    /// When it was remembered
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Create a memory with a fresh id
    pub fn new(content: impl Into<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Options for [`MemoryStore::search`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchOptions {
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Name of the agent asking
    pub agent: String,
    /// Id of the Context running the call
    pub context_id: String,
}

/// Result of [`MemoryStore::search`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySearchResult {
    /// Matching memories, best first
    pub results: Vec<Memory>,
}

/// Options for [`MemoryStore::add`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAddOptions {
    /// Name of the agent recording
    pub agent: String,
    /// Id of the Context running the call
    pub context_id: String,
}

/// Trait for memory stores an agent can own
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Find memories relevant to `query`
    async fn search(
        &self,
        query: &Message,
        options: &MemorySearchOptions,
    ) -> anyhow::Result<MemorySearchResult>;

    /// Remember the exchanged messages (input first, then output)
    async fn add(&self, messages: Vec<Message>, options: &MemoryAddOptions) -> anyhow::Result<()>;
}
