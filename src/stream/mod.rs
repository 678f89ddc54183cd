//! Chunk-stream utilities
//!
//! - `ChunkStream` - boxed stream of response chunks handed to callers
//! - `ResponseAccumulator` - folds deltas into one `Message` and drops no-op deltas
//! - `collect_message` - drain a stream into its final `Message`

use futures::stream::{BoxStream, Stream, StreamExt};

use crate::core::{AgentResponseChunk, DeltaChunk, Message, RuntimeResult};
use serde_json::Value;

/// Stream of chunks returned by a streaming invoke
pub type ChunkStream = BoxStream<'static, RuntimeResult<AgentResponseChunk>>;

/// Folds delta chunks into the resolved output of a call
///
/// JSON fields replace the held value of the same key; text fields are
/// appended to it. A delta that carries only values the accumulator already
/// holds is a no-op and is reported as such so it is never forwarded.
#[derive(Debug, Clone, Default)]
pub struct ResponseAccumulator {
    output: Message,
}

impl ResponseAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk.
    ///
    /// Returns the chunk reduced to the parts that changed the accumulated
    /// output, or `None` if nothing changed. Progress chunks pass through
    /// untouched.
    pub fn absorb(&mut self, chunk: AgentResponseChunk) -> Option<AgentResponseChunk> {
        match chunk {
            AgentResponseChunk::Delta(delta) => self.absorb_delta(delta).map(AgentResponseChunk::Delta),
            progress @ AgentResponseChunk::Progress(_) => Some(progress),
        }
    }

    /// Absorb a delta, see [`absorb`](Self::absorb)
    pub fn absorb_delta(&mut self, mut delta: DeltaChunk) -> Option<DeltaChunk> {
        if let Some(json) = delta.json.take() {
            let fresh: Message = json
                .into_iter()
                .filter(|(key, value)| self.output.get(key) != Some(value))
                .collect();
            for (key, value) in &fresh {
                self.output.insert(key.clone(), value.clone());
            }
            if !fresh.is_empty() {
                delta.json = Some(fresh);
            }
        }

        if let Some(mut text) = delta.text.take() {
            text.retain(|_, piece| !piece.is_empty());
            for (key, piece) in &text {
                match self.output.get_mut(key) {
                    Some(Value::String(existing)) => existing.push_str(piece),
                    _ => {
                        self.output.insert(key.clone(), Value::String(piece.clone()));
                    }
                }
            }
            if !text.is_empty() {
                delta.text = Some(text);
            }
        }

        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    /// The output resolved so far
    pub fn output(&self) -> &Message {
        &self.output
    }

    /// Consume the accumulator and return the resolved output
    pub fn into_message(self) -> Message {
        self.output
    }
}

/// Drain a chunk stream into its final `Message`.
///
/// Progress chunks are ignored. The first error ends the drain.
pub async fn collect_message<S>(stream: S) -> RuntimeResult<Message>
where
    S: Stream<Item = RuntimeResult<AgentResponseChunk>>,
{
    futures::pin_mut!(stream);
    let mut accumulator = ResponseAccumulator::new();
    while let Some(chunk) = stream.next().await {
        if let AgentResponseChunk::Delta(delta) = chunk? {
            accumulator.absorb_delta(delta);
        }
    }
    Ok(accumulator.into_message())
}

/// Keep only delta chunks
pub fn deltas_only(stream: ChunkStream) -> ChunkStream {
    stream
        .filter(|item| {
            let keep = !matches!(item, Ok(chunk) if chunk.is_progress());
            futures::future::ready(keep)
        })
        .boxed()
}
