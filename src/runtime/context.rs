//! Invocation context
//!
//! A `Context` is a cheap, clonable node in a lineage tree. Every invoke
//! derives a child node; all nodes of a lineage share one [`Lineage`]
//! (model, skills, observer, usage ledger, abort signal, user context,
//! memories, event channel and message queue). A reset starts a new
//! lineage that keeps the configuration but not the accounting.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::channels::EventReceiver;
use super::events::{ContextEvent, ContextEventKind, Observer};
use super::lineage::{Lineage, LineageSettings};
use crate::agent::{AgentRef, Memory};
use crate::config::RuntimeConfig;
use crate::core::{ContextLimits, ContextStatus, ContextUsage, Message, RuntimeResult, TokenUsage};
use crate::queue::{
    wiring, MessagePayload, MessageQueue, NextMessage, Role, Subscription, SubscriptionId,
    TopicBinding, Topics, WiredAgent,
};

/// Per-invocation handle into a lineage
#[derive(Clone)]
pub struct Context {
    node: Arc<ContextNode>,
}

struct ContextNode {
    id: String,
    parent_id: Option<String>,
    root_id: String,
    ancestry: Arc<[String]>,
    source_agent: Option<String>,
    lineage: Arc<Lineage>,
}

/// Lineage ids to use instead of the derived ones
#[derive(Debug, Clone, Default)]
pub(crate) struct ChildOverrides {
    pub(crate) parent_id: Option<String>,
    pub(crate) root_id: Option<String>,
    pub(crate) source_agent: Option<String>,
}

impl Context {
    /// Root context without model, skills, observer or limits
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a root context
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Root context configured from a [`RuntimeConfig`]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::builder().with_limits(config.limits).build()
    }

    fn root(lineage: Arc<Lineage>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            node: Arc::new(ContextNode {
                ancestry: Arc::from(vec![id.clone()]),
                root_id: id.clone(),
                parent_id: None,
                source_agent: None,
                id,
                lineage,
            }),
        }
    }

    pub(crate) fn derive_child(&self, overrides: ChildOverrides) -> Self {
        let id = Uuid::new_v4().to_string();
        let mut ancestry = self.node.ancestry.to_vec();
        ancestry.push(id.clone());

        Self {
            node: Arc::new(ContextNode {
                parent_id: Some(overrides.parent_id.unwrap_or_else(|| self.node.id.clone())),
                root_id: overrides
                    .root_id
                    .unwrap_or_else(|| self.node.root_id.clone()),
                ancestry: Arc::from(ancestry),
                source_agent: overrides.source_agent,
                id,
                lineage: self.node.lineage.clone(),
            }),
        }
    }

    /// Child that shares this lineage
    pub fn new_context(&self) -> Context {
        self.derive_child(ChildOverrides::default())
    }

    /// New root with the same configuration but fresh usage, abort signal
    /// and event channel
    pub fn new_context_reset(&self) -> Context {
        Self::root(Arc::new(self.node.lineage.reset()))
    }

    pub(crate) fn lineage(&self) -> &Arc<Lineage> {
        &self.node.lineage
    }

    /// Unique id of this node
    pub fn id(&self) -> &str {
        &self.node.id
    }

    /// Id of the parent node, `None` for a root
    pub fn parent_id(&self) -> Option<&str> {
        self.node.parent_id.as_deref()
    }

    /// Id of the lineage root
    pub fn root_id(&self) -> &str {
        &self.node.root_id
    }

    /// Agent that issued the invoke running in this node, if known
    pub fn source_agent(&self) -> Option<&str> {
        self.node.source_agent.as_deref()
    }

    /// Whether `other` belongs to the same lineage
    pub fn shares_lineage_with(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.node.lineage, &other.node.lineage)
    }

    /// Normal, or Timeout once the lineage's abort signal fired
    pub fn status(&self) -> ContextStatus {
        self.node.lineage.status()
    }

    /// Snapshot of the lineage's usage counters
    pub fn usage(&self) -> ContextUsage {
        self.node.lineage.ledger.snapshot()
    }

    /// The lineage's limits
    pub fn limits(&self) -> ContextLimits {
        *self.node.lineage.ledger.limits()
    }

    /// Report tokens consumed outside a chunk stream
    pub fn record_usage(&self, usage: TokenUsage) -> RuntimeResult<()> {
        self.node.lineage.ledger.record_tokens(usage)
    }

    /// Resolves once the lineage is aborted
    pub async fn cancelled(&self) {
        self.node.lineage.abort.cancelled().await
    }

    /// Default model agent of the lineage
    pub fn model(&self) -> Option<AgentRef> {
        self.node.lineage.model.clone()
    }

    /// Skill pool of the lineage
    pub fn skills(&self) -> &[AgentRef] {
        &self.node.lineage.skills
    }

    /// Copy of the shared user context
    pub fn user_context(&self) -> Message {
        self.node.lineage.user_context()
    }

    /// Merge fields into the shared user context
    pub fn merge_user_context(&self, fields: &Message) {
        self.node.lineage.merge_user_context(fields);
    }

    /// Copy of the shared memories
    pub fn memories(&self) -> Vec<Memory> {
        self.node.lineage.memories()
    }

    /// Append to the shared memories
    pub fn add_memories(&self, memories: impl IntoIterator<Item = Memory>) {
        self.node.lineage.add_memories(memories);
    }

    /// Receive every lifecycle event of the lineage from now on
    pub fn subscribe_events(&self) -> EventReceiver {
        self.node.lineage.subscribe_events()
    }

    pub(crate) fn event(&self, task_id: &str, agent: &str, kind: ContextEventKind) -> ContextEvent {
        ContextEvent {
            context_id: self.node.id.clone(),
            ancestry: self.node.ancestry.clone(),
            task_id: task_id.to_string(),
            agent: agent.to_string(),
            source_agent: self.node.source_agent.clone(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub(crate) fn emit(&self, event: ContextEvent) {
        self.node.lineage.emit(event);
    }

    /// The lineage's message queue
    pub fn queue(&self) -> &MessageQueue {
        &self.node.lineage.queue
    }

    /// Publish `message` to `topics` with this Context attached.
    ///
    /// Returns the number of listener calls made.
    pub fn publish(&self, topics: impl Into<Topics>, message: Message, options: PublishOptions) -> usize {
        if let Some(fields) = &options.user_context {
            self.merge_user_context(fields);
        }
        if !options.memories.is_empty() {
            self.add_memories(options.memories);
        }

        let payload = MessagePayload {
            role: options.role,
            source: options.source,
            message,
            context: self.clone(),
        };
        self.queue().publish(topics, payload)
    }

    /// Register a listener on `topics`
    pub fn subscribe<F>(&self, topics: impl Into<Topics>, listener: F) -> Subscription
    where
        F: Fn(&MessagePayload) + Send + Sync + 'static,
    {
        self.queue().subscribe(topics, listener)
    }

    /// Wait for the next message on `topics`
    pub fn next_message(&self, topics: impl Into<Topics>) -> NextMessage {
        self.queue().next(topics)
    }

    /// Remove a listener; unknown ids are ignored
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.queue().unsubscribe(topic, id)
    }

    /// Bind `agent` to queue topics.
    ///
    /// The listener holds `agent` for as long as it is wired, and the queue
    /// lives as long as the lineage. Keep the returned handle: dropping it
    /// detaches the agent, which also releases an agent that holds a
    /// Context of this lineage.
    #[must_use = "dropping the handle detaches the agent"]
    pub fn wire(&self, agent: AgentRef, binding: TopicBinding) -> WiredAgent {
        wiring::wire(self, agent, binding)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.node.id)
            .field("parent_id", &self.node.parent_id)
            .field("root_id", &self.node.root_id)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for a root [`Context`]
#[derive(Default)]
pub struct ContextBuilder {
    model: Option<AgentRef>,
    skills: Vec<AgentRef>,
    observer: Option<Arc<dyn Observer>>,
    limits: ContextLimits,
    user_context: Message,
    memories: Vec<Memory>,
    queue: Option<MessageQueue>,
}

impl ContextBuilder {
    /// Default model agent for agents that do not bring their own
    pub fn with_model(mut self, model: AgentRef) -> Self {
        self.model = Some(model);
        self
    }

    /// Skill pool used to resolve named handoffs
    pub fn with_skills(mut self, skills: Vec<AgentRef>) -> Self {
        self.skills = skills;
        self
    }

    /// Add one skill to the pool
    pub fn with_skill(mut self, skill: AgentRef) -> Self {
        self.skills.push(skill);
        self
    }

    /// Observer notified of every lifecycle event
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Lineage limits
    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Initial user context
    pub fn with_user_context(mut self, user_context: Message) -> Self {
        self.user_context = user_context;
        self
    }

    /// Initial memories
    pub fn with_memories(mut self, memories: Vec<Memory>) -> Self {
        self.memories = memories;
        self
    }

    /// Share an existing queue instead of creating one
    pub fn with_queue(mut self, queue: MessageQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Build the root context
    pub fn build(self) -> Context {
        let lineage = Lineage::new(LineageSettings {
            model: self.model,
            skills: self.skills,
            observer: self.observer,
            limits: self.limits,
            queue: self.queue.unwrap_or_default(),
            user_context: self.user_context,
            memories: self.memories,
        });
        Context::root(Arc::new(lineage))
    }
}

/// Options for [`Context::publish`]
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Publisher role
    pub role: Role,
    /// Publishing agent
    pub source: Option<String>,
    /// Fields merged into the lineage's user context first
    pub user_context: Option<Message>,
    /// Memories appended to the lineage first
    pub memories: Vec<Memory>,
}

impl PublishOptions {
    /// Published by a user
    pub fn user() -> Self {
        Self::default()
    }

    /// Published by an agent
    pub fn from_agent(name: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            source: Some(name.into()),
            ..Self::default()
        }
    }

    /// Merge these fields into the user context
    pub fn with_user_context(mut self, user_context: Message) -> Self {
        self.user_context = Some(user_context);
        self
    }

    /// Append these memories
    pub fn with_memories(mut self, memories: Vec<Memory>) -> Self {
        self.memories = memories;
        self
    }
}
