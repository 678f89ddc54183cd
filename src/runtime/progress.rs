//! Progress chunks derived from lifecycle events

use async_stream::stream;
use futures::stream::StreamExt;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::channels::EventReceiver;
use super::events::ContextEvent;
use crate::core::{AgentResponseChunk, RuntimeResult};
use crate::stream::ChunkStream;

enum Step {
    Event(Result<ContextEvent, RecvError>),
    Chunk(Option<RuntimeResult<AgentResponseChunk>>),
}

/// Interleave `chunks` with progress for events raised in `scope` or below.
///
/// Events already queued win over the next chunk, so a call's start
/// appears before its first output. Events still buffered when `chunks`
/// ends are drained before the stream closes.
pub(crate) fn merge(chunks: ChunkStream, mut events: EventReceiver, scope: String) -> ChunkStream {
    stream! {
        let mut chunks = chunks;
        let mut events_open = true;

        loop {
            let step = tokio::select! {
                biased;
                event = events.recv(), if events_open => Step::Event(event),
                item = chunks.next() => Step::Chunk(item),
            };

            match step {
                Step::Event(Ok(event)) => {
                    if event.is_within(&scope) {
                        yield Ok(AgentResponseChunk::Progress(event.to_progress()));
                    }
                }
                Step::Event(Err(RecvError::Lagged(missed))) => {
                    tracing::warn!("[Progress] Dropped {} lifecycle events", missed);
                }
                Step::Event(Err(RecvError::Closed)) => events_open = false,
                Step::Chunk(Some(Ok(chunk))) => yield Ok(chunk),
                Step::Chunk(Some(Err(err))) => {
                    yield Err(err);
                    return;
                }
                Step::Chunk(None) => break,
            }
        }

        loop {
            match events.try_recv() {
                Ok(event) => {
                    if event.is_within(&scope) {
                        yield Ok(AgentResponseChunk::Progress(event.to_progress()));
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!("[Progress] Dropped {} lifecycle events", missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
    .boxed()
}
