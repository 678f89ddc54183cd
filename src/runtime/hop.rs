//! One agent call
//!
//! A hop wraps a single `process` with everything the runtime does around
//! it, in this order: limit checks and call counting, start hooks, memory
//! search, the started event, `process` itself (chunks are stripped of
//! usage, de-duplicated and forwarded), memory add, end hooks and the
//! succeed or failed event.

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use uuid::Uuid;

use super::context::Context;
use super::events::ContextEventKind;
use crate::agent::{
    AgentOutput, AgentRef, AgentStreamItem, MemoryAddOptions, MemorySearchOptions, ProcessOutput,
    TransferTarget,
};
use crate::core::{AgentResponseChunk, Message, RuntimeError, RuntimeResult};
use crate::hooks::HookContext;
use crate::stream::ResponseAccumulator;

/// What a hop hands to the transfer loop
#[derive(Debug)]
pub(crate) enum HopItem {
    /// A chunk that changed the hop's output, or a progress chunk
    Chunk(AgentResponseChunk),
    /// The agent asked to hand off; always the last item
    Transfer(TransferTarget),
}

pub(crate) fn run(
    context: Context,
    agent: AgentRef,
    input: Message,
) -> BoxStream<'static, RuntimeResult<HopItem>> {
    stream! {
        if let Err(err) = context.lineage().ledger.begin_agent_call() {
            tracing::warn!("[Hop] Refusing '{}': {}", agent.name(), err);
            yield Err(err);
            return;
        }

        let task_id = Uuid::new_v4().to_string();
        let name = agent.name().to_string();
        tracing::debug!(task_id = %task_id, context_id = %context.id(), "[Hop] Starting '{}'", name);

        let mut input = input;
        if let Some(hooks) = agent.hooks() {
            let mut hook_ctx = HookContext::agent_start(&context, &name, input);
            hooks.run(&mut hook_ctx);
            input = hook_ctx.input;
        }

        if let Some(store) = agent.memory() {
            let options = MemorySearchOptions {
                limit: None,
                agent: name.clone(),
                context_id: context.id().to_string(),
            };
            match store.search(&input, &options).await {
                Ok(found) => {
                    tracing::debug!("[Hop] '{}' recalled {} memories", name, found.results.len());
                    context.add_memories(found.results);
                }
                Err(err) => {
                    let err = RuntimeError::Memory(format!("search failed: {err:#}"));
                    yield Err(fail(&context, &agent, &task_id, input, err));
                    return;
                }
            }
        }

        context.emit(context.event(
            &task_id,
            &name,
            ContextEventKind::AgentStarted { input: input.clone() },
        ));

        let output = match agent.process(input.clone(), context.clone()).await {
            Ok(output) => output,
            Err(err) => {
                yield Err(fail(&context, &agent, &task_id, input, err));
                return;
            }
        };

        let mut accumulator = ResponseAccumulator::new();
        let mut transfer = None;

        match output {
            ProcessOutput::Output(AgentOutput::Message(message)) => {
                if let Some(chunk) = accumulator.absorb(AgentResponseChunk::json(message)) {
                    yield Ok(HopItem::Chunk(chunk));
                }
            }
            ProcessOutput::Output(AgentOutput::Transfer(target)) => transfer = Some(target),
            ProcessOutput::Stream(mut items) => {
                while let Some(item) = items.next().await {
                    match item {
                        Ok(AgentStreamItem::Chunk(chunk)) => {
                            let chunk = match record_usage(&context, chunk) {
                                Ok(chunk) => chunk,
                                Err(err) => {
                                    yield Err(fail(&context, &agent, &task_id, input, err));
                                    return;
                                }
                            };
                            if let Some(chunk) = accumulator.absorb(chunk) {
                                yield Ok(HopItem::Chunk(chunk));
                            }
                        }
                        Ok(AgentStreamItem::Transfer(target)) => transfer = Some(target),
                        Err(err) => {
                            yield Err(fail(&context, &agent, &task_id, input, err));
                            return;
                        }
                    }
                }
            }
        }

        let output = accumulator.into_message();

        if transfer.is_none() {
            if let Some(store) = agent.memory() {
                let options = MemoryAddOptions {
                    agent: name.clone(),
                    context_id: context.id().to_string(),
                };
                if let Err(err) = store.add(vec![input.clone(), output.clone()], &options).await {
                    let err = RuntimeError::Memory(format!("add failed: {err:#}"));
                    yield Err(fail(&context, &agent, &task_id, input, err));
                    return;
                }
            }
        }

        if let Some(hooks) = agent.hooks() {
            let mut hook_ctx = HookContext::agent_end(&context, &name, input, &output);
            hooks.run(&mut hook_ctx);
        }

        tracing::debug!(task_id = %task_id, "[Hop] '{}' finished", name);
        context.emit(context.event(&task_id, &name, ContextEventKind::AgentSucceed { output }));

        if let Some(target) = transfer {
            tracing::debug!("[Hop] '{}' hands off to '{}'", name, target.name());
            yield Ok(HopItem::Transfer(target));
        }
    }
    .boxed()
}

/// Move reported usage into the ledger; what is left is forwarded
fn record_usage(context: &Context, chunk: AgentResponseChunk) -> RuntimeResult<AgentResponseChunk> {
    match chunk {
        AgentResponseChunk::Delta(mut delta) => {
            if let Some(usage) = delta.usage.take() {
                context.record_usage(usage)?;
            }
            Ok(AgentResponseChunk::Delta(delta))
        }
        progress => Ok(progress),
    }
}

/// Run end hooks and emit the failed event
fn fail(
    context: &Context,
    agent: &AgentRef,
    task_id: &str,
    input: Message,
    err: RuntimeError,
) -> RuntimeError {
    tracing::warn!(task_id = %task_id, "[Hop] '{}' failed: {}", agent.name(), err);

    if let Some(hooks) = agent.hooks() {
        let mut hook_ctx = HookContext::agent_failed(context, agent.name(), input, &err);
        hooks.run(&mut hook_ctx);
    }

    context.emit(context.event(
        task_id,
        agent.name(),
        ContextEventKind::AgentFailed {
            error: err.to_string(),
        },
    ));
    err
}
