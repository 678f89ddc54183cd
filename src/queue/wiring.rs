//! Agents bound to queue topics
//!
//! A wired agent listens on its input topics. Each message is handled on its
//! own task: the agent is invoked in the publisher's Context (so the
//! lineage's limits apply across hops) and a non-empty output is published
//! to the output topics with role `Agent`.

use crate::agent::AgentRef;
use crate::runtime::{Context, PublishOptions};

use super::{Subscription, Topics};

/// Input and output topics of a wired agent
#[derive(Debug, Clone, Default)]
pub struct TopicBinding {
    /// Topics the agent listens on
    pub subscribe: Topics,
    /// Topics its outputs are published to
    pub publish: Topics,
}

impl TopicBinding {
    /// Listen on `subscribe`, publish to `publish`
    pub fn new(subscribe: impl Into<Topics>, publish: impl Into<Topics>) -> Self {
        Self {
            subscribe: subscribe.into(),
            publish: publish.into(),
        }
    }

    /// Listen only; outputs are dropped
    pub fn listen(subscribe: impl Into<Topics>) -> Self {
        Self {
            subscribe: subscribe.into(),
            publish: Topics::default(),
        }
    }
}

/// Handle of an agent wired to topics; detaches when dropped
#[derive(Debug)]
pub struct WiredAgent {
    agent_name: String,
    subscription: Subscription,
}

impl WiredAgent {
    /// Name of the wired agent
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Stop listening. Messages already being handled still finish.
    pub fn detach(&self) {
        tracing::debug!("[Wiring] Detaching '{}'", self.agent_name);
        self.subscription.unsubscribe();
    }
}

impl Drop for WiredAgent {
    fn drop(&mut self) {
        self.detach();
    }
}

pub(crate) fn wire(context: &Context, agent: AgentRef, binding: TopicBinding) -> WiredAgent {
    let agent_name = agent.name().to_string();
    let publish = binding.publish;

    let subscription = context.queue().subscribe(binding.subscribe, move |payload| {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("[Wiring] No tokio runtime, dropping message for '{}'", agent.name());
            return;
        };

        let agent = agent.clone();
        let publish = publish.clone();
        let payload = payload.clone();
        handle.spawn(async move {
            let context = payload.context;
            match context.invoke(&agent, payload.message).await {
                Ok(output) => {
                    if !publish.is_empty() && !output.is_empty() {
                        context.publish(publish, output, PublishOptions::from_agent(agent.name()));
                    }
                }
                Err(err) if err.is_limit_exceeded() || err.is_timeout() => {
                    tracing::info!("[Wiring] '{}' stopped: {}", agent.name(), err);
                }
                Err(err) => {
                    tracing::error!("[Wiring] '{}' failed: {}", agent.name(), err);
                }
            }
        });
    });

    tracing::debug!("[Wiring] '{}' listening on {:?}", agent_name, subscription.topics());
    WiredAgent {
        agent_name,
        subscription,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FunctionAgent;
    use crate::core::{text_message, ContextLimits, Message};
    use std::time::Duration;

    fn player(name: &'static str) -> AgentRef {
        FunctionAgent::new(name, move |_input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(text_message("message", name))
        })
        .into_ref()
    }

    async fn settle(context: &Context, calls: u64) {
        for _ in 0..200 {
            if context.usage().agent_calls >= calls {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_ping_pong_stops_at_invoke_limit() {
        let ctx = Context::builder()
            .with_limits(ContextLimits::new().with_max_agent_invokes(6))
            .build();
        let _ping = ctx.wire(player("ping"), TopicBinding::new("ping", "pong"));
        let _pong = ctx.wire(player("pong"), TopicBinding::new("pong", "ping"));

        let delivered = ctx.publish("ping", text_message("message", "serve"), PublishOptions::user());
        assert_eq!(delivered, 1);

        settle(&ctx, 6).await;
        assert_eq!(ctx.usage().agent_calls, 6);
        assert_eq!(ctx.queue().listener_count("ping"), 1);
    }

    #[tokio::test]
    async fn test_outputs_reach_the_next_topic() {
        let ctx = Context::new();
        let _echo = ctx.wire(player("echo"), TopicBinding::new("in", "out"));
        let next = ctx.next_message("out");

        ctx.publish("in", text_message("message", "hello"), PublishOptions::user());
        let payload = tokio::time::timeout(Duration::from_secs(1), next)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(payload.message, text_message("message", "echo"));
        assert_eq!(payload.source.as_deref(), Some("echo"));
        assert!(payload.context.shares_lineage_with(&ctx));
    }

    #[tokio::test]
    async fn test_dropping_the_handle_releases_the_agent() {
        let ctx = Context::new();
        let agent = player("holder");
        let wired = ctx.wire(agent.clone(), TopicBinding::listen("events"));
        assert_eq!(std::sync::Arc::strong_count(&agent), 2);

        drop(wired);
        assert_eq!(ctx.queue().listener_count("events"), 0);
        assert_eq!(std::sync::Arc::strong_count(&agent), 1);
        assert_eq!(ctx.publish("events", Message::new(), PublishOptions::user()), 0);
    }

    #[tokio::test]
    async fn test_detach() {
        let ctx = Context::new();
        let sink = ctx.wire(player("sink"), TopicBinding::listen("events"));
        assert_eq!(sink.agent_name(), "sink");

        assert_eq!(ctx.publish("events", Message::new(), PublishOptions::user()), 1);
        settle(&ctx, 1).await;

        sink.detach();
        sink.detach();
        assert_eq!(ctx.publish("events", Message::new(), PublishOptions::user()), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctx.usage().agent_calls, 1);
    }
}
