//! Channel plumbing for streaming agents and lifecycle events
//!
//! - **Chunk channel** (mpsc): a producer task pushes stream items, the
//!   runtime consumes them as the agent's `AgentStream`
//! - **Event channel** (broadcast): lineage-wide lifecycle events, one
//!   receiver per invoke that asked for progress chunks

use futures::stream::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use super::events::ContextEvent;
use crate::agent::{AgentStream, AgentStreamItem, TransferTarget};
use crate::core::{AgentResponseChunk, RuntimeError, RuntimeResult, TokenUsage};

/// Default buffer size for chunk channels
pub const CHUNK_CHANNEL_SIZE: usize = 32;

/// Default buffer size for the lineage event channel
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// Sender half of the lineage event channel
pub type EventSender = broadcast::Sender<ContextEvent>;

/// Receiver half of the lineage event channel
pub type EventReceiver = broadcast::Receiver<ContextEvent>;

/// Producer side of a chunk channel
///
/// Every send fails with `ChannelClosed` once the runtime stopped reading,
/// which is the producer's cue to stop.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<RuntimeResult<AgentStreamItem>>,
}

impl ChunkSender {
    /// Send a chunk
    pub async fn send(&self, chunk: AgentResponseChunk) -> RuntimeResult<()> {
        self.send_item(Ok(AgentStreamItem::Chunk(chunk))).await
    }

    /// Send a text delta
    pub async fn send_text(&self, key: &str, text: impl Into<String>) -> RuntimeResult<()> {
        self.send(AgentResponseChunk::text(key, text)).await
    }

    /// Send a structured field
    pub async fn send_field(&self, key: &str, value: impl Into<Value>) -> RuntimeResult<()> {
        self.send(AgentResponseChunk::field(key, value)).await
    }

    /// Report token usage
    pub async fn send_usage(&self, usage: TokenUsage) -> RuntimeResult<()> {
        self.send(AgentResponseChunk::usage(usage)).await
    }

    /// Hand the call off once the stream ends
    pub async fn transfer(&self, target: TransferTarget) -> RuntimeResult<()> {
        self.send_item(Ok(AgentStreamItem::Transfer(target))).await
    }

    /// Fail the stream
    pub async fn fail(&self, err: RuntimeError) -> RuntimeResult<()> {
        self.send_item(Err(err)).await
    }

    /// Whether the consumer is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send_item(&self, item: RuntimeResult<AgentStreamItem>) -> RuntimeResult<()> {
        self.tx.send(item).await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

/// Create a chunk channel.
///
/// Returns the sender for a producer task and the stream to hand back from
/// `process`. The stream ends when every sender is dropped.
pub fn create_chunk_channel() -> (ChunkSender, AgentStream) {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_SIZE);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();
    (ChunkSender { tx }, stream)
}

/// Create a lineage event channel.
///
/// Receivers are created by calling `sender.subscribe()`.
pub fn create_event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
    tx
}
