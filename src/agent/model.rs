//! Model-calling agent
//!
//! A `ModelAgent` turns its input into a model request, invokes a model
//! agent (its own, or the lineage's default) through the Context and
//! streams the answer. Models are ordinary agents that follow this
//! contract:
//!
//! Request (input of the model agent):
//! ```json
//! {
//!   "instructions": "...",
//!   "messages": [{"role": "user", "content": {...}}, ...],
//!   "tools": [{"name": "...", "description": "..."}],
//!   "toolChoice": "auto" | "none" | "router",
//!   "memories": [...]
//! }
//! ```
//!
//! Response (output of the model agent): text deltas under `text`, and
//! optionally `toolCalls: [{"id", "name", "arguments"}]`. Token usage is
//! reported with usage chunks.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::memory::MemoryStore;
use super::{find_skill, Agent, AgentRef, AgentStreamItem, ProcessOutput, TransferTarget};
use crate::core::{AgentResponseChunk, Message, RuntimeError, RuntimeResult};
use crate::hooks::HookRegistry;
use crate::runtime::{Context, InvokeOptions};
use crate::stream::ResponseAccumulator;

/// Key of the model's text output
pub const MODEL_TEXT_KEY: &str = "text";

/// Key of the model's tool calls
pub const MODEL_TOOL_CALLS_KEY: &str = "toolCalls";

/// How the model may use the agent's skills
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Skills are tools; their results go back to the model
    #[default]
    Auto,
    /// No tools are offered
    None,
    /// The model picks one skill and the call is handed off to it
    Router,
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, echoed back with the result
    #[serde(default)]
    pub id: String,
    /// Skill name
    pub name: String,
    /// Input for the skill
    #[serde(default)]
    pub arguments: Value,
}

/// Agent that asks a model and runs its skills as tools
///
/// ```ignore
/// let agent = ModelAgent::new("assistant")
///     .with_instructions("Answer briefly.")
///     .with_skill(weather)
///     .with_tool_choice(ToolChoice::Auto)
///     .with_max_iterations(8);
/// ```
#[derive(Clone)]
pub struct ModelAgent {
    name: String,
    description: Option<String>,
    instructions: String,
    model: Option<AgentRef>,
    skills: Vec<AgentRef>,
    tool_choice: ToolChoice,
    output_key: String,
    max_iterations: usize,
    memory: Option<Arc<dyn MemoryStore>>,
    hooks: Option<Arc<HookRegistry>>,
}

impl ModelAgent {
    /// Create an agent using the lineage's default model
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            instructions: String::new(),
            model: None,
            skills: Vec::new(),
            tool_choice: ToolChoice::Auto,
            output_key: "message".to_string(),
            max_iterations: 16,
            memory: None,
            hooks: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the instructions sent with every request
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Use this model instead of the lineage's default
    pub fn with_model(mut self, model: AgentRef) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the skills
    pub fn with_skills(mut self, skills: Vec<AgentRef>) -> Self {
        self.skills = skills;
        self
    }

    /// Add one skill
    pub fn with_skill(mut self, skill: AgentRef) -> Self {
        self.skills.push(skill);
        self
    }

    /// Set how the model may use the skills
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    /// Key the model's text is streamed under (default `message`)
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    /// Maximum model requests per call
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
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

    fn tools(&self) -> Vec<Value> {
        if self.tool_choice == ToolChoice::None {
            return Vec::new();
        }
        self.skills
            .iter()
            .map(|skill| {
                json!({
                    "name": skill.name(),
                    "description": skill.description().unwrap_or_default(),
                })
            })
            .collect()
    }

    fn build_request(&self, messages: &[Value], context: &Context) -> RuntimeResult<Message> {
        let mut request = Message::new();
        request.insert("instructions".into(), Value::String(self.instructions.clone()));
        request.insert("messages".into(), Value::Array(messages.to_vec()));
        request.insert("tools".into(), Value::Array(self.tools()));
        request.insert("toolChoice".into(), serde_json::to_value(self.tool_choice)?);
        request.insert("memories".into(), serde_json::to_value(context.memories())?);
        Ok(request)
    }

    /// One model request per iteration until the model stops calling tools
    fn run(self, model: AgentRef, input: Message, context: Context) -> super::AgentStream {
        stream! {
            let mut messages = vec![json!({ "role": "user", "content": input })];

            for iteration in 0..self.max_iterations {
                let request = match self.build_request(&messages, &context) {
                    Ok(request) => request,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                tracing::debug!("[ModelAgent] '{}' request #{} to '{}'", self.name, iteration + 1, model.name());
                let options = InvokeOptions::new().with_source_agent(&self.name);
                let mut answer = match context.invoke_stream(&model, request, options) {
                    Ok(answer) => answer,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                let mut accumulator = ResponseAccumulator::new();
                while let Some(chunk) = answer.next().await {
                    let delta = match chunk {
                        Ok(AgentResponseChunk::Delta(delta)) => delta,
                        Ok(AgentResponseChunk::Progress(_)) => continue,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    if let Some(piece) = delta.text.as_ref().and_then(|text| text.get(MODEL_TEXT_KEY)) {
                        yield Ok(AgentStreamItem::Chunk(AgentResponseChunk::text(&self.output_key, piece.as_str())));
                    }
                    accumulator.absorb_delta(delta);
                }

                let mut output = accumulator.into_message();
                output.remove(MODEL_TEXT_KEY);
                let mut calls = match take_tool_calls(&mut output) {
                    Ok(calls) => calls,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                if self.tool_choice == ToolChoice::None && !calls.is_empty() {
                    tracing::warn!(
                        "[ModelAgent] '{}' ignores {} tool calls, tools are disabled",
                        self.name,
                        calls.len()
                    );
                    calls.clear();
                }

                if calls.is_empty() {
                    if !output.is_empty() {
                        yield Ok(AgentStreamItem::Chunk(AgentResponseChunk::json(output)));
                    }
                    return;
                }

                if self.tool_choice == ToolChoice::Router {
                    let chosen = calls[0].name.clone();
                    tracing::info!("[ModelAgent] '{}' routes to '{}'", self.name, chosen);
                    yield Ok(AgentStreamItem::Transfer(TransferTarget::Named(chosen)));
                    return;
                }

                messages.push(json!({ "role": "assistant", "toolCalls": calls }));

                for call in calls {
                    let Some(skill) = find_skill(&self.skills, &call.name) else {
                        yield Err(RuntimeError::ToolNotFound(call.name));
                        return;
                    };
                    let arguments = match call.arguments {
                        Value::Object(arguments) => arguments,
                        Value::Null => Message::new(),
                        other => {
                            yield Err(RuntimeError::InvalidInput(format!(
                                "arguments of tool '{}' must be an object, got {}",
                                call.name, other
                            )));
                            return;
                        }
                    };

                    tracing::debug!("[ModelAgent] '{}' calls tool '{}'", self.name, call.name);
                    let options = InvokeOptions::new()
                        .without_transfer()
                        .with_source_agent(&self.name);
                    let result = match context.invoke_output(skill, arguments, options).await {
                        Ok(result) => result,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };

                    if let Some(target) = result.transfer {
                        tracing::info!("[ModelAgent] Tool '{}' hands off to '{}'", call.name, target.name());
                        yield Ok(AgentStreamItem::Transfer(target));
                        return;
                    }

                    messages.push(json!({
                        "role": "tool",
                        "toolCallId": call.id,
                        "name": call.name,
                        "content": result.message,
                    }));
                }
            }

            yield Err(RuntimeError::AgentFailed {
                agent: self.name.clone(),
                message: format!("model still calling tools after {} iterations", self.max_iterations),
            });
        }
        .boxed()
    }
}

fn take_tool_calls(output: &mut Message) -> RuntimeResult<Vec<ToolCall>> {
    match output.remove(MODEL_TOOL_CALLS_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(calls) => Ok(serde_json::from_value(calls)?),
    }
}

impl std::fmt::Debug for ModelAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAgent")
            .field("name", &self.name)
            .field("tool_choice", &self.tool_choice)
            .field("skills", &self.skills.len())
            .field("output_key", &self.output_key)
            .finish()
    }
}

#[async_trait]
impl Agent for ModelAgent {
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
        let model = self.model.clone().or_else(|| context.model()).ok_or_else(|| {
            RuntimeError::config(format!(
                "ModelAgent '{}' has no model and the context provides none",
                self.name
            ))
        })?;
        Ok(ProcessOutput::Stream(self.clone().run(model, input, context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentOutput, FunctionAgent};
    use crate::core::{text_message, to_message, TokenUsage};
    use parking_lot::Mutex;

    /// Model that answers from a script, one response per request
    fn scripted_model(responses: Vec<Value>, requests: Arc<Mutex<Vec<Message>>>) -> AgentRef {
        let responses = Arc::new(Mutex::new(responses.into_iter()));
        FunctionAgent::streaming("scripted-model", move |request: Message, _ctx| {
            requests.lock().push(request);
            let response = responses.lock().next().unwrap_or(Value::Null);
            futures::stream::iter(model_chunks(response))
        })
        .into_ref()
    }

    fn model_chunks(response: Value) -> Vec<RuntimeResult<AgentStreamItem>> {
        let mut chunks = Vec::new();
        if let Some(text) = response.get("text").and_then(Value::as_str) {
            for word in text.split_inclusive(' ') {
                chunks.push(Ok(AgentResponseChunk::text(MODEL_TEXT_KEY, word).into()));
            }
        }
        if let Some(calls) = response.get(MODEL_TOOL_CALLS_KEY) {
            chunks.push(Ok(AgentResponseChunk::field(MODEL_TOOL_CALLS_KEY, calls.clone()).into()));
        }
        chunks.push(Ok(AgentResponseChunk::usage(TokenUsage::new(10, 5)).into()));
        chunks
    }

    fn weather_tool() -> AgentRef {
        FunctionAgent::new("weather", |input: Message, _ctx| async move {
            let city = input.get("city").and_then(Value::as_str).unwrap_or("?").to_string();
            Ok::<_, anyhow::Error>(text_message("forecast", format!("sunny in {city}")))
        })
        .with_description("Weather by city")
        .into_ref()
    }

    #[tokio::test]
    async fn test_plain_answer_streams_under_output_key() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let model = scripted_model(vec![json!({"text": "Hello there"})], requests.clone());
        let agent = ModelAgent::new("assistant")
            .with_instructions("Be brief")
            .with_model(model)
            .into_ref();

        let ctx = Context::new();
        let output = ctx.invoke(&agent, text_message("message", "hi")).await.unwrap();
        assert_eq!(output.get("message"), Some(&json!("Hello there")));
        assert!(output.get(MODEL_TEXT_KEY).is_none());

        let request = &requests.lock()[0];
        assert_eq!(request.get("instructions"), Some(&json!("Be brief")));
        assert_eq!(request.get("toolChoice"), Some(&json!("auto")));

        // one call for the agent, one for the model
        assert_eq!(ctx.usage().agent_calls, 2);
        assert_eq!(ctx.usage().total_tokens(), 15);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let model = scripted_model(
            vec![
                json!({"toolCalls": [{"id": "c1", "name": "weather", "arguments": {"city": "Oslo"}}]}),
                json!({"text": "It is sunny"}),
            ],
            requests.clone(),
        );
        let agent = ModelAgent::new("assistant")
            .with_model(model)
            .with_skill(weather_tool())
            .into_ref();

        let ctx = Context::new();
        let output = ctx.invoke(&agent, text_message("message", "weather?")).await.unwrap();
        assert_eq!(output.get("message"), Some(&json!("It is sunny")));

        let requests = requests.lock();
        assert_eq!(requests.len(), 2);
        let messages = requests[1].get("messages").and_then(Value::as_array).unwrap();
        let tool_result = messages.last().unwrap();
        assert_eq!(tool_result.get("role"), Some(&json!("tool")));
        assert_eq!(tool_result["content"]["forecast"], json!("sunny in Oslo"));
        assert_eq!(ctx.usage().agent_calls, 4);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        let model = scripted_model(
            vec![json!({"toolCalls": [{"id": "c1", "name": "teleport"}]})],
            Arc::new(Mutex::new(Vec::new())),
        );
        let agent = ModelAgent::new("assistant").with_model(model).into_ref();

        let err = Context::new()
            .invoke(&agent, text_message("message", "go"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ToolNotFound(name) if name == "teleport"));
    }

    #[tokio::test]
    async fn test_router_hands_off_to_chosen_skill() {
        let model = scripted_model(
            vec![json!({"toolCalls": [{"id": "r", "name": "weather"}]})],
            Arc::new(Mutex::new(Vec::new())),
        );
        let agent = ModelAgent::new("router")
            .with_model(model)
            .with_skill(weather_tool())
            .with_tool_choice(ToolChoice::Router)
            .into_ref();

        let ctx = Context::new();
        let output = ctx
            .invoke_output(
                &agent,
                to_message(json!({"city": "Rome"})).unwrap(),
                InvokeOptions::new().with_active_agent(),
            )
            .await
            .unwrap();
        assert_eq!(output.message.get("forecast"), Some(&json!("sunny in Rome")));
        assert_eq!(output.active_agent.unwrap().name(), "weather");
    }

    #[tokio::test]
    async fn test_tool_handoff_becomes_agent_handoff() {
        let billing = FunctionAgent::new("billing", |_input: Message, _ctx| async move {
            Ok::<_, anyhow::Error>(text_message("message", "billing here"))
        })
        .into_ref();
        let target = billing.clone();
        let escalate = FunctionAgent::new("escalate", move |_input: Message, _ctx| {
            let target = target.clone();
            async move { Ok::<_, anyhow::Error>(AgentOutput::transfer_to(target)) }
        })
        .into_ref();
        let model = scripted_model(
            vec![json!({"toolCalls": [{"id": "c1", "name": "escalate"}]})],
            Arc::new(Mutex::new(Vec::new())),
        );
        let agent = ModelAgent::new("assistant")
            .with_model(model)
            .with_skill(escalate)
            .into_ref();

        let output = Context::new()
            .invoke(&agent, text_message("message", "refund"))
            .await
            .unwrap();
        assert_eq!(output.get("message"), Some(&json!("billing here")));
    }

    #[tokio::test]
    async fn test_missing_model_is_configuration_error() {
        let agent = ModelAgent::new("assistant").into_ref();
        let ctx = Context::new();
        let err = ctx.invoke(&agent, Message::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
        assert_eq!(ctx.usage().agent_calls, 1);
    }

    #[tokio::test]
    async fn test_context_model_is_fallback() {
        let model = scripted_model(vec![json!({"text": "from context"})], Arc::new(Mutex::new(Vec::new())));
        let ctx = Context::builder().with_model(model).build();
        let agent = ModelAgent::new("assistant").with_tool_choice(ToolChoice::None).into_ref();

        let output = ctx.invoke(&agent, Message::new()).await.unwrap();
        assert_eq!(output.get("message"), Some(&json!("from context")));
    }

    #[tokio::test]
    async fn test_none_tool_choice_sends_no_tools() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let model = scripted_model(vec![json!({"text": "ok"})], requests.clone());
        let agent = ModelAgent::new("assistant")
            .with_model(model)
            .with_skill(weather_tool())
            .with_tool_choice(ToolChoice::None)
            .into_ref();

        Context::new().invoke(&agent, Message::new()).await.unwrap();
        assert_eq!(requests.lock()[0].get("tools"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_none_tool_choice_ignores_returned_tool_calls() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let model = scripted_model(
            vec![json!({
                "text": "No tools today",
                "toolCalls": [{"id": "c1", "name": "weather", "arguments": {"city": "Oslo"}}],
            })],
            requests.clone(),
        );
        let agent = ModelAgent::new("assistant")
            .with_model(model)
            .with_skill(weather_tool())
            .with_tool_choice(ToolChoice::None)
            .into_ref();

        let ctx = Context::new();
        let output = ctx.invoke(&agent, Message::new()).await.unwrap();
        assert_eq!(output.get("message"), Some(&json!("No tools today")));
        assert!(output.get(MODEL_TOOL_CALLS_KEY).is_none());

        // the agent and one model round, the tool never runs
        assert_eq!(requests.lock().len(), 1);
        assert_eq!(ctx.usage().agent_calls, 2);
    }
}
