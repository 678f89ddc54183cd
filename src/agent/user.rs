//! Persistent proxy bound to one agent and one Context
//!
//! A `UserAgent` is what an invoke without a message returns. Each
//! `invoke` repeats the full protocol against the bound agent in the bound
//! Context, so calls share the lineage's usage and limits. When topics are
//! set, the proxy publishes its input and waits for the first reply instead
//! of invoking directly.

use async_trait::async_trait;
use futures::stream::StreamExt;

use super::{Agent, AgentRef, AgentStreamItem, ProcessOutput};
use crate::core::{Message, RuntimeResult};
use crate::queue::Topics;
use crate::runtime::{Context, InvokeOptions, InvokeStream, PublishOptions};

#[derive(Debug, Clone)]
struct UserTopics {
    input: Topics,
    output: Topics,
}

/// Proxy for an agent bound to a Context
#[derive(Clone)]
pub struct UserAgent {
    name: String,
    agent: AgentRef,
    context: Context,
    topics: Option<UserTopics>,
}

impl UserAgent {
    /// Bind `agent` to `context`
    pub fn new(context: Context, agent: AgentRef) -> Self {
        Self {
            name: format!("user:{}", agent.name()),
            agent,
            context,
            topics: None,
        }
    }

    /// Talk through the queue: publish inputs to `input`, return the first
    /// message that arrives on `output`
    pub fn with_topics(mut self, input: impl Into<Topics>, output: impl Into<Topics>) -> Self {
        self.topics = Some(UserTopics {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    /// The bound agent
    pub fn agent(&self) -> &AgentRef {
        &self.agent
    }

    /// The bound Context
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Wrap into an `AgentRef`
    pub fn into_ref(self) -> AgentRef {
        std::sync::Arc::new(self)
    }

    /// Send `message` and wait for the reply
    pub async fn invoke(&self, message: Message) -> RuntimeResult<Message> {
        let Some(topics) = &self.topics else {
            return self.context.invoke(&self.agent, message).await;
        };

        // Listen before publishing so a synchronous reply is not missed
        let reply = self.context.next_message(topics.output.clone());
        self.context
            .publish(topics.input.clone(), message, PublishOptions::user());
        Ok(reply.await?.message)
    }

    /// Send `message` and stream the reply from the bound agent
    pub fn invoke_stream(&self, message: Message, options: InvokeOptions) -> RuntimeResult<InvokeStream> {
        self.context.invoke_stream(&self.agent, message, options)
    }
}

impl std::fmt::Debug for UserAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAgent")
            .field("agent", &self.agent.name())
            .field("context", &self.context.id())
            .field("topics", &self.topics)
            .finish()
    }
}

#[async_trait]
impl Agent for UserAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.agent.description()
    }

    async fn process(&self, input: Message, context: Context) -> RuntimeResult<ProcessOutput> {
        let forwarded = context.invoke_stream(
            &self.agent,
            input,
            InvokeOptions::new().with_source_agent(&self.name),
        )?;
        Ok(ProcessOutput::Stream(
            forwarded.map(|chunk| chunk.map(AgentStreamItem::Chunk)).boxed(),
        ))
    }
}
