//! Closure-backed agents

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{Stream, StreamExt};
use futures::FutureExt;

use super::memory::MemoryStore;
use super::{Agent, AgentRef, AgentStreamItem, ProcessOutput};
use crate::core::{Message, RuntimeError, RuntimeResult};
use crate::hooks::HookRegistry;
use crate::runtime::Context;

type ProcessFn =
    Arc<dyn Fn(Message, Context) -> BoxFuture<'static, RuntimeResult<ProcessOutput>> + Send + Sync>;

/// An agent whose `process` is a closure
///
/// ```ignore
/// let greeter = FunctionAgent::new("greeter", |input: Message, _ctx| async move {
///     let name = input.get("name").and_then(|v| v.as_str()).unwrap_or("there");
///     Ok::<_, anyhow::Error>(text_message("message", format!("Hello, {name}!")))
/// });
/// ```
#[derive(Clone)]
pub struct FunctionAgent {
    name: String,
    description: Option<String>,
    skills: Vec<AgentRef>,
    memory: Option<Arc<dyn MemoryStore>>,
    hooks: Option<Arc<HookRegistry>>,
    process: ProcessFn,
}

impl FunctionAgent {
    /// Create an agent from an async closure.
    ///
    /// The closure may return anything convertible into a `ProcessOutput`:
    /// a `Message`, an `AgentOutput` (including a transfer) or an
    /// `AgentStream`. Its `anyhow` errors become agent errors.
    pub fn new<F, Fut, O>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Message, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ProcessOutput> + 'static,
    {
        let name = name.into();
        let agent_name = name.clone();
        let process: ProcessFn = Arc::new(move |input, context| {
            let agent_name = agent_name.clone();
            f(input, context)
                .map(move |result| -> RuntimeResult<ProcessOutput> {
                    result
                        .map(Into::into)
                        .map_err(|err| RuntimeError::agent(agent_name, err))
                })
                .boxed()
        });
        Self::from_parts(name, process)
    }

    /// Create an agent from a closure returning a stream of items
    pub fn streaming<F, S>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Message, Context) -> S + Send + Sync + 'static,
        S: Stream<Item = RuntimeResult<AgentStreamItem>> + Send + 'static,
    {
        let process: ProcessFn = Arc::new(move |input, context| {
            let stream = f(input, context).boxed();
            futures::future::ready(Ok(ProcessOutput::Stream(stream))).boxed()
        });
        Self::from_parts(name.into(), process)
    }

    fn from_parts(name: String, process: ProcessFn) -> Self {
        Self {
            name,
            description: None,
            skills: Vec::new(),
            memory: None,
            hooks: None,
            process,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the skills this agent can call or hand off to
    pub fn with_skills(mut self, skills: Vec<AgentRef>) -> Self {
        self.skills = skills;
        self
    }

    /// Add one skill
    pub fn with_skill(mut self, skill: AgentRef) -> Self {
        self.skills.push(skill);
        self
    }

    /// Attach a memory store
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach lifecycle hooks
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Wrap into an `AgentRef`
    pub fn into_ref(self) -> AgentRef {
        Arc::new(self)
    }
}

impl std::fmt::Debug for FunctionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionAgent")
            .field("name", &self.name)
            .field("skills", &self.skills.len())
            .field("memory", &self.memory.is_some())
            .finish()
    }
}

#[async_trait]
impl Agent for FunctionAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn skills(&self) -> &[AgentRef] {
        &self.skills
    }

    fn memory(&self) -> Option<&Arc<dyn MemoryStore>> {
        self.memory.as_ref()
    }

    fn hooks(&self) -> Option<&HookRegistry> {
        self.hooks.as_deref()
    }

    async fn process(&self, input: Message, context: Context) -> RuntimeResult<ProcessOutput> {
        (self.process)(input, context).await
    }
}
