//! Handoff loop
//!
//! Runs hops until one finishes without asking for a transfer. Chunks of
//! every hop are forwarded in order; each step of a hop is raced against
//! the lineage's abort signal and followed by a limit check.

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};

use super::context::Context;
use super::hop::{self, HopItem};
use crate::agent::{find_skill, AgentRef, TransferTarget};
use crate::core::{AgentResponseChunk, Message, RuntimeError, RuntimeResult};
use crate::hooks::{HookContext, HookEvent};

/// What the loop hands to the invoke layer
#[derive(Debug)]
pub(crate) enum LoopItem {
    /// A chunk from the current hop
    Chunk(AgentResponseChunk),
    /// The agent that produced the final output; always the last item
    ActiveAgent(AgentRef),
    /// A handoff that was not followed because transfers are disabled;
    /// always the last item
    Unresolved(TransferTarget),
}

pub(crate) fn run(
    context: Context,
    agent: AgentRef,
    input: Message,
    disable_transfer: bool,
) -> BoxStream<'static, RuntimeResult<LoopItem>> {
    stream! {
        let lineage = context.lineage().clone();
        let mut active = agent;

        loop {
            let mut hop = hop::run(context.clone(), active.clone(), input.clone());
            let mut transfer = None;

            loop {
                let next = match lineage.abort.race(hop.next()).await {
                    Ok(next) => next,
                    Err(err) => {
                        tracing::warn!("[Transfer] '{}' aborted: {}", active.name(), err);
                        yield Err(err);
                        return;
                    }
                };

                match next {
                    None => break,
                    Some(Ok(HopItem::Chunk(chunk))) => yield Ok(LoopItem::Chunk(chunk)),
                    Some(Ok(HopItem::Transfer(target))) => transfer = Some(target),
                    Some(Err(err)) => {
                        yield Err(err);
                        return;
                    }
                }

                if let Err(err) = lineage.ledger.ensure_healthy() {
                    yield Err(err);
                    return;
                }
            }

            let Some(target) = transfer else {
                break;
            };

            if disable_transfer {
                tracing::debug!("[Transfer] Not following handoff to '{}'", target.name());
                yield Ok(LoopItem::Unresolved(target));
                return;
            }

            let next_agent = match resolve(&target, &active, &context) {
                Ok(next_agent) => next_agent,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            if let Some(hooks) = active.hooks().filter(|h| h.has_hooks(HookEvent::Handoff)) {
                let mut hook_ctx =
                    HookContext::handoff(&context, active.name(), next_agent.name(), input.clone());
                hooks.run(&mut hook_ctx);
            }

            tracing::info!("[Transfer] '{}' -> '{}'", active.name(), next_agent.name());
            active = next_agent;
        }

        yield Ok(LoopItem::ActiveAgent(active));
    }
    .boxed()
}

/// Look a target up: concrete agents as-is, names among the outgoing
/// agent's skills and then the lineage's skill pool
fn resolve(target: &TransferTarget, from: &AgentRef, context: &Context) -> RuntimeResult<AgentRef> {
    match target {
        TransferTarget::Agent(agent) => Ok(agent.clone()),
        TransferTarget::Named(name) => find_skill(from.skills(), name)
            .or_else(|| find_skill(context.skills(), name))
            .cloned()
            .ok_or_else(|| RuntimeError::TransferTargetNotFound(name.clone())),
    }
}
