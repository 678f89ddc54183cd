//! Invoke entry points
//!
//! Every invoke derives a child Context from the caller's, arms the
//! lineage timer, runs the handoff loop and shapes the result: a folded
//! [`InvokeOutput`], or an [`InvokeStream`] of chunks. Wall-clock time is
//! added to the lineage's usage when the run ends, fails or is dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::time::Instant;

use async_stream::stream;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::json;
use tokio::sync::oneshot;

use super::context::{ChildOverrides, Context};
use super::lineage::Lineage;
use super::progress;
use super::transfer::{self, LoopItem};
use crate::agent::{AgentRef, Memory, TransferTarget, UserAgent};
use crate::core::{AgentResponseChunk, Message, RuntimeError, RuntimeResult, META_KEY};
use crate::stream::{ChunkStream, ResponseAccumulator};

/// Options for [`Context::invoke_with`]
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Return a chunk stream instead of the folded output
    pub streaming: bool,
    /// Also return the agent that produced the final output
    pub return_active_agent: bool,
    /// Interleave progress chunks for this call and everything below it
    pub return_progress_chunks: bool,
    /// Add lineage usage under `$meta`
    pub return_metadata: bool,
    /// Stop at the first handoff instead of following it
    pub disable_transfer: bool,
    /// Fields merged into the lineage's user context before the call
    pub user_context: Option<Message>,
    /// Memories appended to the lineage before the call
    pub memories: Vec<Memory>,
    /// Agent issuing the call
    pub source_agent: Option<String>,
    /// Parent id to record instead of the caller's id
    pub parent_id: Option<String>,
    /// Root id to record instead of the caller's root id
    pub root_id: Option<String>,
}

impl InvokeOptions {
    /// Default options: non-streaming, transfers followed
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a chunk stream
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Return the final active agent
    pub fn with_active_agent(mut self) -> Self {
        self.return_active_agent = true;
        self
    }

    /// Interleave progress chunks
    pub fn with_progress_chunks(mut self) -> Self {
        self.return_progress_chunks = true;
        self
    }

    /// Add `$meta.usage`
    pub fn with_metadata(mut self) -> Self {
        self.return_metadata = true;
        self
    }

    /// Do not follow handoffs
    pub fn without_transfer(mut self) -> Self {
        self.disable_transfer = true;
        self
    }

    /// Merge fields into the user context first
    pub fn with_user_context(mut self, user_context: Message) -> Self {
        self.user_context = Some(user_context);
        self
    }

    /// Append memories first
    pub fn with_memories(mut self, memories: Vec<Memory>) -> Self {
        self.memories = memories;
        self
    }

    /// Record the issuing agent
    pub fn with_source_agent(mut self, name: impl Into<String>) -> Self {
        self.source_agent = Some(name.into());
        self
    }

    /// Override the recorded parent id
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Override the recorded root id
    pub fn with_root_id(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = Some(root_id.into());
        self
    }

    fn validate(&self) -> RuntimeResult<()> {
        if self.root_id.is_some() && self.parent_id.is_none() {
            return Err(RuntimeError::config("root_id override requires a parent_id override"));
        }
        Ok(())
    }
}

/// Folded result of a non-streaming invoke
#[derive(Debug, Clone)]
pub struct InvokeOutput {
    /// Final output, with `$meta` when metadata was requested
    pub message: Message,
    /// Agent that produced the output, when requested
    pub active_agent: Option<AgentRef>,
    /// Handoff that was not followed, when transfers were disabled
    pub transfer: Option<TransferTarget>,
}

/// Resolves to the agent that produced the final output of a streaming
/// invoke, once its stream has ended
#[derive(Debug)]
pub struct ActiveAgentHandle {
    rx: oneshot::Receiver<AgentRef>,
}

impl Future for ActiveAgentHandle {
    type Output = RuntimeResult<AgentRef>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| RuntimeError::ActiveAgentUnavailable))
    }
}

/// Chunk stream of a streaming invoke
pub struct InvokeStream {
    chunks: ChunkStream,
    active_agent: Option<ActiveAgentHandle>,
}

impl InvokeStream {
    /// Take the active agent handle, present when it was requested
    pub fn take_active_agent(&mut self) -> Option<ActiveAgentHandle> {
        self.active_agent.take()
    }

    /// The bare chunk stream
    pub fn into_chunks(self) -> ChunkStream {
        self.chunks
    }
}

impl Stream for InvokeStream {
    type Item = RuntimeResult<AgentResponseChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for InvokeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeStream")
            .field("active_agent", &self.active_agent.is_some())
            .finish()
    }
}

/// Result of [`Context::invoke_with`]
#[derive(Debug)]
pub enum InvokeResponse {
    /// Non-streaming result
    Output(InvokeOutput),
    /// Streaming result
    Stream(InvokeStream),
    /// No message was given: a proxy bound to the agent and this Context
    Session(UserAgent),
}

/// Adds elapsed wall-clock time to the lineage when dropped
struct DurationGuard {
    lineage: Arc<Lineage>,
    started: Instant,
}

impl Drop for DurationGuard {
    fn drop(&mut self) {
        self.lineage.ledger.add_duration(self.started.elapsed());
    }
}

struct Run {
    child: Context,
    items: BoxStream<'static, RuntimeResult<LoopItem>>,
}

impl Context {
    fn start(&self, agent: &AgentRef, message: Message, options: &InvokeOptions) -> RuntimeResult<Run> {
        options.validate()?;

        if let Some(fields) = &options.user_context {
            self.merge_user_context(fields);
        }
        if !options.memories.is_empty() {
            self.add_memories(options.memories.iter().cloned());
        }

        let child = self.derive_child(ChildOverrides {
            parent_id: options.parent_id.clone(),
            root_id: options.root_id.clone(),
            source_agent: options.source_agent.clone(),
        });
        child.lineage().abort.arm();

        tracing::debug!(
            context_id = %child.id(),
            parent_id = ?child.parent_id(),
            "[Invoke] '{}' (streaming: {})",
            agent.name(),
            options.streaming
        );

        let lineage = child.lineage().clone();
        let inner = transfer::run(child.clone(), agent.clone(), message, options.disable_transfer);
        let items = stream! {
            let _guard = DurationGuard { lineage, started: Instant::now() };
            let mut inner = inner;
            while let Some(item) = inner.next().await {
                yield item;
            }
        }
        .boxed();

        Ok(Run { child, items })
    }

    /// Invoke `agent` and return its final output
    pub async fn invoke(&self, agent: &AgentRef, message: Message) -> RuntimeResult<Message> {
        Ok(self.invoke_output(agent, message, InvokeOptions::new()).await?.message)
    }

    /// Invoke with options.
    ///
    /// Without a message, returns a [`UserAgent`] bound to `agent` and this
    /// Context instead of running anything.
    pub async fn invoke_with(
        &self,
        agent: &AgentRef,
        message: Option<Message>,
        options: InvokeOptions,
    ) -> RuntimeResult<InvokeResponse> {
        let Some(message) = message else {
            return Ok(InvokeResponse::Session(self.bind(agent)));
        };

        if options.streaming {
            self.invoke_stream(agent, message, options).map(InvokeResponse::Stream)
        } else {
            self.invoke_output(agent, message, options)
                .await
                .map(InvokeResponse::Output)
        }
    }

    /// Invoke and fold every chunk into the final output
    pub async fn invoke_output(
        &self,
        agent: &AgentRef,
        message: Message,
        options: InvokeOptions,
    ) -> RuntimeResult<InvokeOutput> {
        let Run { child, mut items } = self.start(agent, message, &options)?;

        let mut accumulator = ResponseAccumulator::new();
        let mut active_agent = None;
        let mut transfer = None;

        while let Some(item) = items.next().await {
            match item? {
                LoopItem::Chunk(AgentResponseChunk::Delta(delta)) => {
                    accumulator.absorb_delta(delta);
                }
                LoopItem::Chunk(AgentResponseChunk::Progress(_)) => {}
                LoopItem::ActiveAgent(agent) => active_agent = Some(agent),
                LoopItem::Unresolved(target) => transfer = Some(target),
            }
        }
        drop(items);

        let mut message = accumulator.into_message();
        if options.return_metadata {
            message.insert(META_KEY.to_string(), metadata(&child));
        }

        Ok(InvokeOutput {
            message,
            active_agent: active_agent.filter(|_| options.return_active_agent),
            transfer,
        })
    }

    /// Invoke and stream the chunks.
    ///
    /// A handoff that is not followed because transfers are disabled is
    /// dropped from a stream; use [`invoke_output`](Self::invoke_output) to
    /// observe it.
    pub fn invoke_stream(
        &self,
        agent: &AgentRef,
        message: Message,
        options: InvokeOptions,
    ) -> RuntimeResult<InvokeStream> {
        let events = options
            .return_progress_chunks
            .then(|| self.subscribe_events());
        let Run { child, items } = self.start(agent, message, &options)?;

        let (active_tx, active_rx) = oneshot::channel();
        let with_progress = options.return_progress_chunks;
        let with_metadata = options.return_metadata;
        let scope = child.id().to_string();

        let chunks = stream! {
            let mut items = items;
            let mut active_tx = Some(active_tx);

            while let Some(item) = items.next().await {
                match item {
                    Ok(LoopItem::Chunk(chunk)) => {
                        if chunk.is_progress() && !with_progress {
                            continue;
                        }
                        yield Ok(chunk);
                    }
                    Ok(LoopItem::ActiveAgent(agent)) => {
                        if let Some(tx) = active_tx.take() {
                            let _ = tx.send(agent);
                        }
                    }
                    Ok(LoopItem::Unresolved(target)) => {
                        tracing::debug!("[Invoke] Dropping unfollowed handoff to '{}'", target.name());
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            drop(items);

            if with_metadata {
                let mut meta = Message::new();
                meta.insert(META_KEY.to_string(), metadata(&child));
                yield Ok(AgentResponseChunk::json(meta));
            }
        }
        .boxed();

        let chunks = match events {
            Some(events) => progress::merge(chunks, events, scope),
            None => chunks,
        };

        Ok(InvokeStream {
            chunks,
            active_agent: options
                .return_active_agent
                .then_some(ActiveAgentHandle { rx: active_rx }),
        })
    }

    /// A persistent proxy for `agent` bound to this Context
    pub fn bind(&self, agent: &AgentRef) -> UserAgent {
        UserAgent::new(self.clone(), agent.clone())
    }
}

fn metadata(context: &Context) -> serde_json::Value {
    json!({ "usage": context.usage() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentOutput, AgentStreamItem, FunctionAgent};
    use crate::core::{
        text_message, to_message, ContextLimits, ContextStatus, ProgressEvent, TokenUsage,
    };
    use crate::hooks::{HookContext, HookEvent, HookRegistry};
    use crate::runtime::events::{ContextEvent, Observer};
    use crate::stream::collect_message;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn echo(name: &'static str) -> AgentRef {
        FunctionAgent::new(name, |input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(input)
        })
        .into_ref()
    }

    fn replier(name: &'static str, text: &'static str) -> AgentRef {
        FunctionAgent::new(name, move |_input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(text_message("message", text))
        })
        .into_ref()
    }

    /// Streams `prefix` then hands off to `target`
    fn forwarder(name: &'static str, prefix: &'static str, target: AgentRef) -> AgentRef {
        FunctionAgent::streaming(name, move |_input, _ctx| {
            futures::stream::iter(vec![
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::text("message", prefix))),
                Ok(AgentStreamItem::Transfer(TransferTarget::Agent(target.clone()))),
            ])
        })
        .into_ref()
    }

    fn sleeper(name: &'static str, millis: u64) -> AgentRef {
        FunctionAgent::new(name, move |_input: Message, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, anyhow::Error>(text_message("message", "awake"))
        })
        .into_ref()
    }

    /// A chain of `len` agents, each handing off to the next
    fn chain(len: usize) -> AgentRef {
        let mut agent = replier("last", "done");
        for _ in 1..len {
            let next = agent.clone();
            agent = FunctionAgent::new("link", move |_input: Message, _ctx| {
                let next = next.clone();
                async move { Ok::<_, anyhow::Error>(AgentOutput::transfer_to(next)) }
            })
            .into_ref();
        }
        agent
    }

    #[tokio::test]
    async fn test_invoke_returns_output() {
        let ctx = Context::new();
        let output = ctx.invoke(&echo("echo"), text_message("message", "hi")).await.unwrap();
        assert_eq!(output, text_message("message", "hi"));
        assert_eq!(ctx.usage().agent_calls, 1);
    }

    #[tokio::test]
    async fn test_transfer_streams_both_agents_in_order() {
        let b = FunctionAgent::streaming("b", |_input, _ctx| {
            futures::stream::iter(vec![
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::text("message", " world"))),
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::field("done", true))),
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::field("done", true))),
            ])
        })
        .into_ref();
        let a = forwarder("a", "hello", b);

        let ctx = Context::new();
        let chunks: Vec<_> = ctx
            .invoke_stream(&a, Message::new(), InvokeOptions::new())
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        // the repeated `done` field is a no-op and never forwarded
        assert_eq!(
            chunks,
            vec![
                AgentResponseChunk::text("message", "hello"),
                AgentResponseChunk::text("message", " world"),
                AgentResponseChunk::field("done", true),
            ]
        );
        assert_eq!(ctx.usage().agent_calls, 2);
    }

    #[tokio::test]
    async fn test_agent_calls_count_every_hop() {
        for len in 1..=4 {
            let ctx = Context::new();
            let output = ctx.invoke(&chain(len), Message::new()).await.unwrap();
            assert_eq!(output.get("message").and_then(|v| v.as_str()), Some("done"));
            assert_eq!(ctx.usage().agent_calls, len as u64);
        }
    }

    #[tokio::test]
    async fn test_max_agent_invokes() {
        let ctx = Context::builder()
            .with_limits(ContextLimits::new().with_max_agent_invokes(2))
            .build();
        let err = ctx.invoke(&chain(3), Message::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Exceeded max agent invokes 2/2");
        assert_eq!(ctx.usage().agent_calls, 2);

        // the breach is lineage-wide
        let err = ctx.invoke(&echo("echo"), Message::new()).await.unwrap_err();
        assert!(err.is_limit_exceeded());

        // a reset lineage starts over
        let fresh = ctx.new_context_reset();
        assert!(fresh.invoke(&echo("echo"), Message::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let limits = ContextLimits::new().with_timeout_ms(200);

        let ctx = Context::builder().with_limits(limits).build();
        let output = ctx.invoke(&sleeper("quick", 100), Message::new()).await.unwrap();
        assert_eq!(output.get("message").and_then(|v| v.as_str()), Some("awake"));
        assert_eq!(ctx.status(), ContextStatus::Normal);

        let ctx = Context::builder().with_limits(limits).build();
        let err = ctx.invoke(&sleeper("slow", 300), Message::new()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Context is timeout");
        assert_eq!(ctx.status(), ContextStatus::Timeout);

        // every later invoke in the lineage fails immediately
        let err = ctx.invoke(&echo("echo"), Message::new()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_from_first_invoke() {
        let ctx = Context::builder()
            .with_limits(ContextLimits::new().with_timeout_ms(200))
            .build();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(ctx.invoke(&sleeper("quick", 100), Message::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_is_accumulated() {
        let ctx = Context::new();
        ctx.invoke(&sleeper("a", 100), Message::new()).await.unwrap();
        ctx.invoke(&sleeper("b", 50), Message::new()).await.unwrap();
        assert!(ctx.usage().duration_ms >= 150);
    }

    #[tokio::test]
    async fn test_streaming_matches_non_streaming() {
        let b = FunctionAgent::streaming("b", |_input, _ctx| {
            futures::stream::iter(vec![
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::text("message", "two "))),
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::field("score", 1))),
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::field("score", 2))),
                Ok(AgentStreamItem::Chunk(AgentResponseChunk::text("message", "three"))),
            ])
        })
        .into_ref();
        let a = forwarder("a", "one ", b);

        let folded = Context::new().invoke(&a, Message::new()).await.unwrap();
        let streamed = collect_message(
            Context::new()
                .invoke_stream(&a, Message::new(), InvokeOptions::new())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(folded, streamed);
        assert_eq!(
            folded,
            to_message(serde_json::json!({"message": "one two three", "score": 2})).unwrap()
        );
    }

    #[tokio::test]
    async fn test_transfer_leaves_no_trace_in_output() {
        let a = FunctionAgent::new("a", |_input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(AgentOutput::transfer_to_named("b"))
        })
        .into_ref();
        let ctx = Context::builder().with_skill(replier("b", "from b")).build();

        let output = ctx.invoke(&a, Message::new()).await.unwrap();
        assert_eq!(output, text_message("message", "from b"));
    }

    #[tokio::test]
    async fn test_named_transfer_prefers_own_skills() {
        let a = FunctionAgent::new("a", |_input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(AgentOutput::transfer_to_named("b"))
        })
        .with_skill(replier("b", "own skill"))
        .into_ref();
        let ctx = Context::builder().with_skill(replier("b", "pool")).build();

        let output = ctx.invoke(&a, Message::new()).await.unwrap();
        assert_eq!(output, text_message("message", "own skill"));
    }

    #[tokio::test]
    async fn test_named_transfer_not_found() {
        let a = FunctionAgent::new("a", |_input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(AgentOutput::transfer_to_named("ghost"))
        })
        .into_ref();
        let err = Context::new().invoke(&a, Message::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::TransferTargetNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_disable_transfer_returns_target() {
        let a = forwarder("a", "partial", replier("b", "never"));
        let ctx = Context::new();

        let output = ctx
            .invoke_output(&a, Message::new(), InvokeOptions::new().without_transfer())
            .await
            .unwrap();
        assert_eq!(output.message, text_message("message", "partial"));
        assert_eq!(output.transfer.unwrap().name(), "b");
        assert_eq!(ctx.usage().agent_calls, 1);

        let streamed = collect_message(
            ctx.invoke_stream(&a, Message::new(), InvokeOptions::new().without_transfer())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(streamed, text_message("message", "partial"));
    }

    #[tokio::test]
    async fn test_handoff_hook_sees_source_and_target() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut hooks = HookRegistry::new();
        hooks.add(HookEvent::Handoff, move |ctx: &mut HookContext<'_>| {
            sink.lock().push((ctx.agent.to_string(), ctx.target.unwrap_or_default().to_string()));
        });

        let target = replier("b", "done");
        let a = FunctionAgent::new("a", move |_input: Message, _ctx| {
            let target = target.clone();
            async move { Ok::<_, anyhow::Error>(AgentOutput::transfer_to(target)) }
        })
        .with_hooks(hooks)
        .into_ref();

        Context::new().invoke(&a, Message::new()).await.unwrap();
        assert_eq!(seen.lock().as_slice(), &[("a".to_string(), "b".to_string())]);
    }

    #[tokio::test]
    async fn test_start_hook_rewrites_input() {
        let mut hooks = HookRegistry::new();
        hooks.add(HookEvent::AgentStart, |ctx: &mut HookContext<'_>| {
            ctx.input.insert("greeting".into(), serde_json::json!("hello"));
        });
        let agent = FunctionAgent::new("echo", |input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(input)
        })
        .with_hooks(hooks)
        .into_ref();

        let output = Context::new().invoke(&agent, Message::new()).await.unwrap();
        assert_eq!(output, text_message("greeting", "hello"));
    }

    #[tokio::test]
    async fn test_metadata_only_when_requested() {
        let ctx = Context::new();
        let plain = ctx.invoke(&echo("echo"), Message::new()).await.unwrap();
        assert!(plain.get(META_KEY).is_none());

        let output = ctx
            .invoke_output(&echo("echo"), Message::new(), InvokeOptions::new().with_metadata())
            .await
            .unwrap();
        assert_eq!(output.message[META_KEY]["usage"]["agentCalls"], 2);

        let streamed = collect_message(
            ctx.invoke_stream(&echo("echo"), Message::new(), InvokeOptions::new().with_metadata())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(streamed[META_KEY]["usage"]["agentCalls"], 3);
    }

    #[tokio::test]
    async fn test_active_agent() {
        let a = forwarder("a", "x", replier("b", "y"));
        let ctx = Context::new();

        let output = ctx
            .invoke_output(&a, Message::new(), InvokeOptions::new().with_active_agent())
            .await
            .unwrap();
        assert_eq!(output.active_agent.unwrap().name(), "b");

        let plain = ctx.invoke_output(&a, Message::new(), InvokeOptions::new()).await.unwrap();
        assert!(plain.active_agent.is_none());

        let mut stream = ctx
            .invoke_stream(&a, Message::new(), InvokeOptions::new().with_active_agent())
            .unwrap();
        let handle = stream.take_active_agent().unwrap();
        while stream.next().await.is_some() {}
        assert_eq!(handle.await.unwrap().name(), "b");
    }

    #[tokio::test]
    async fn test_active_agent_unavailable_on_failure() {
        let broken = FunctionAgent::new("broken", |_input: Message, _ctx| async move {
            Err::<Message, _>(anyhow::anyhow!("nope"))
        })
        .into_ref();
        let mut stream = Context::new()
            .invoke_stream(&broken, Message::new(), InvokeOptions::new().with_active_agent())
            .unwrap();
        let handle = stream.take_active_agent().unwrap();
        assert!(stream.next().await.unwrap().is_err());
        drop(stream);
        assert!(matches!(handle.await, Err(RuntimeError::ActiveAgentUnavailable)));
    }

    #[tokio::test]
    async fn test_progress_chunks_cover_nested_calls() {
        let inner = replier("inner", "deep");
        let outer = FunctionAgent::new("outer", move |_input: Message, ctx: Context| {
            let inner = inner.clone();
            async move {
                let deep = ctx.invoke(&inner, Message::new()).await?;
                Ok::<_, anyhow::Error>(deep)
            }
        })
        .into_ref();

        let chunks: Vec<_> = Context::new()
            .invoke_stream(&outer, Message::new(), InvokeOptions::new().with_progress_chunks())
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let progress: Vec<(String, &'static str)> = chunks
            .iter()
            .filter_map(|chunk| match chunk {
                AgentResponseChunk::Progress(p) => Some((
                    p.agent.clone(),
                    match p.event {
                        ProgressEvent::Start { .. } => "start",
                        ProgressEvent::End { .. } => "end",
                        ProgressEvent::Failed { .. } => "failed",
                    },
                )),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![
                ("outer".to_string(), "start"),
                ("inner".to_string(), "start"),
                ("inner".to_string(), "end"),
                ("outer".to_string(), "end"),
            ]
        );

        let without: Vec<_> = Context::new()
            .invoke_stream(&outer, Message::new(), InvokeOptions::new())
            .unwrap()
            .collect()
            .await;
        assert!(without.iter().all(|c| !c.as_ref().unwrap().is_progress()));
    }

    #[tokio::test]
    async fn test_progress_excludes_sibling_invokes() {
        let ctx = Context::new();
        let mut events = ctx.subscribe_events();
        let stream = ctx
            .invoke_stream(&echo("mine"), Message::new(), InvokeOptions::new().with_progress_chunks())
            .unwrap();
        ctx.invoke(&echo("sibling"), Message::new()).await.unwrap();

        let chunks: Vec<_> = stream.map(|c| c.unwrap()).collect().await;
        assert!(chunks.iter().all(|chunk| match chunk {
            AgentResponseChunk::Progress(p) => p.agent == "mine",
            _ => true,
        }));

        // the lineage channel sees both
        let mut agents = Vec::new();
        while let Ok(event) = events.try_recv() {
            agents.push(event.agent);
        }
        assert!(agents.contains(&"mine".to_string()));
        assert!(agents.contains(&"sibling".to_string()));
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<String>>,
    }

    impl Observer for RecordingObserver {
        fn record(&self, event: &ContextEvent) -> anyhow::Result<()> {
            self.seen.lock().push(format!("record:{}", event.agent));
            Ok(())
        }

        fn update(&self, event: &ContextEvent) -> anyhow::Result<()> {
            self.seen.lock().push(format!("update:{}", event.agent));
            anyhow::bail!("observer storage full")
        }
    }

    #[tokio::test]
    async fn test_observer_sees_lifecycle_and_cannot_fail_invoke() {
        let observer = std::sync::Arc::new(RecordingObserver::default());
        let ctx = Context::builder().with_observer(observer.clone()).build();

        ctx.invoke(&echo("echo"), Message::new()).await.unwrap();
        assert_eq!(
            observer.seen.lock().as_slice(),
            &["record:echo".to_string(), "update:echo".to_string()]
        );
    }

    #[tokio::test]
    async fn test_user_context_and_memories_merge_into_lineage() {
        let ctx = Context::new();
        let reader = FunctionAgent::new("reader", |_input: Message, ctx: Context| async move {
            let user = ctx.user_context();
            let mut out = Message::new();
            out.insert("user".into(), user.get("user").cloned().unwrap_or_default());
            out.insert("memories".into(), serde_json::json!(ctx.memories().len()));
            Ok::<_, anyhow::Error>(out)
        })
        .into_ref();

        let output = ctx
            .invoke_output(
                &reader,
                Message::new(),
                InvokeOptions::new()
                    .with_user_context(text_message("user", "ada"))
                    .with_memories(vec![crate::agent::Memory::new("likes tea")]),
            )
            .await
            .unwrap();
        assert_eq!(output.message["user"], "ada");
        assert_eq!(output.message["memories"], 1);
        assert_eq!(ctx.user_context()["user"], "ada");
    }

    #[tokio::test]
    async fn test_nested_breach_fails_the_top_level_invoke() {
        let ctx = Context::builder()
            .with_limits(ContextLimits::new().with_max_agent_invokes(2))
            .build();
        let inner = replier("inner", "deep");
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        // swallows the nested failure and reports success anyway
        let outer = FunctionAgent::new("outer", move |_input: Message, ctx: Context| {
            let inner = inner.clone();
            let sink = sink.clone();
            async move {
                for _ in 0..2 {
                    let result = ctx.invoke(&inner, Message::new()).await;
                    sink.lock().push(result.map_err(|err| err.to_string()));
                }
                Ok::<_, anyhow::Error>(text_message("message", "fine"))
            }
        })
        .into_ref();

        let err = ctx.invoke(&outer, Message::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Exceeded max agent invokes 2/2");
        assert_eq!(ctx.usage().agent_calls, 2);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_ok());
        assert_eq!(
            seen[1].as_ref().unwrap_err(),
            "Exceeded max agent invokes 2/2"
        );
    }

    #[tokio::test]
    async fn test_token_budget_used_exactly_still_invokes() {
        let ctx = Context::builder()
            .with_limits(ContextLimits::new().with_max_tokens(150))
            .build();
        ctx.record_usage(TokenUsage::new(100, 50)).unwrap();

        let output = ctx.invoke(&replier("free", "no tokens"), Message::new()).await.unwrap();
        assert_eq!(output, text_message("message", "no tokens"));
    }

    #[tokio::test]
    async fn test_root_override_requires_parent() {
        let err = Context::new()
            .invoke_stream(&echo("echo"), Message::new(), InvokeOptions::new().with_root_id("r"))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }
}
