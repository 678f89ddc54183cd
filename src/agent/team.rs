//! Composite agent running its skills as a team

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::StreamExt;

use super::memory::MemoryStore;
use super::{Agent, AgentRef, AgentStream, AgentStreamItem, ProcessOutput};
use crate::core::{merge_into, AgentResponseChunk, Message, RuntimeError, RuntimeResult};
use crate::hooks::HookRegistry;
use crate::runtime::{Context, InvokeOptions, InvokeStream};
use crate::stream::ResponseAccumulator;

/// How a team runs its skills
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessMode {
    /// One after another; each skill sees the input merged with every
    /// earlier skill's output
    #[default]
    Sequential,
    /// All at once on the same input; chunks interleave as they arrive
    Parallel,
}

/// Agent that delegates to its skills
#[derive(Clone)]
pub struct TeamAgent {
    name: String,
    description: Option<String>,
    skills: Vec<AgentRef>,
    mode: ProcessMode,
    memory: Option<Arc<dyn MemoryStore>>,
    hooks: Option<Arc<HookRegistry>>,
}

impl TeamAgent {
    /// Create a sequential team
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            skills: Vec::new(),
            mode: ProcessMode::Sequential,
            memory: None,
            hooks: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the members
    pub fn with_skills(mut self, skills: Vec<AgentRef>) -> Self {
        self.skills = skills;
        self
    }

    /// Add one member
    pub fn with_skill(mut self, skill: AgentRef) -> Self {
        self.skills.push(skill);
        self
    }

    /// Set the process mode
    pub fn with_mode(mut self, mode: ProcessMode) -> Self {
        self.mode = mode;
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

    fn member_options(&self) -> InvokeOptions {
        InvokeOptions::new().with_source_agent(&self.name)
    }

    fn sequential(&self, input: Message, context: Context) -> AgentStream {
        let skills = self.skills.clone();
        let options = self.member_options();
        stream! {
            let mut carried = input;
            for skill in skills {
                let mut member = match context.invoke_stream(&skill, carried.clone(), options.clone()) {
                    Ok(member) => member,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                let mut accumulator = ResponseAccumulator::new();
                while let Some(chunk) = member.next().await {
                    match chunk {
                        Ok(chunk) => {
                            if let AgentResponseChunk::Delta(delta) = &chunk {
                                accumulator.absorb_delta(delta.clone());
                            }
                            yield Ok(AgentStreamItem::Chunk(chunk));
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
                merge_into(&mut carried, accumulator.output());
            }
        }
        .boxed()
    }

    fn parallel(&self, input: Message, context: &Context) -> RuntimeResult<AgentStream> {
        let members = self
            .skills
            .iter()
            .map(|skill| context.invoke_stream(skill, input.clone(), self.member_options()))
            .collect::<RuntimeResult<Vec<InvokeStream>>>()?;

        Ok(futures::stream::select_all(members)
            .map(|chunk| chunk.map(AgentStreamItem::Chunk))
            .boxed())
    }
}

impl std::fmt::Debug for TeamAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamAgent")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("skills", &self.skills.len())
            .finish()
    }
}

#[async_trait]
impl Agent for TeamAgent {
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
        if self.skills.is_empty() {
            return Err(RuntimeError::config(format!("TeamAgent '{}' has no skills", self.name)));
        }

        tracing::debug!(
            "[TeamAgent] '{}' running {} skills ({:?})",
            self.name,
            self.skills.len(),
            self.mode
        );

        let stream = match self.mode {
            ProcessMode::Sequential => self.sequential(input, context),
            ProcessMode::Parallel => self.parallel(input, &context)?,
        };
        Ok(ProcessOutput::Stream(stream))
    }
}
