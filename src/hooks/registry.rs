//! Hook Registry
//!
//! Contains:
//! - `Hook` trait - for implementing hooks
//! - `HookMatcher` - matches agents by regex pattern
//! - `HookRegistry` - stores and runs hooks

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use super::types::{HookContext, HookEvent};

/// Trait for hook implementations
///
/// Hooks are synchronous and must not block the call. If you need async
/// work (like HTTP calls), spawn a task and return.
pub trait Hook: Send + Sync {
    /// Execute the hook with the given context
    fn call(&self, ctx: &mut HookContext<'_>);
}

/// Implement Hook for closures
impl<F> Hook for F
where
    F: for<'a> Fn(&mut HookContext<'a>) + Send + Sync,
{
    fn call(&self, ctx: &mut HookContext<'_>) {
        (self)(ctx)
    }
}

/// Type alias for stored hooks
pub type ArcHook = Arc<dyn Hook>;

/// Matches agents by name pattern and executes a hook
///
/// For `Handoff` the pattern is tested against the target agent's name,
/// for every other event against the agent's own name.
pub struct HookMatcher {
    /// Regex pattern to match agent names (None = match all)
    pattern: Option<Regex>,

    /// The hook to execute
    hook: ArcHook,
}

impl HookMatcher {
    /// Create a matcher that matches all agents
    pub fn new<H: Hook + 'static>(hook: H) -> Self {
        Self {
            pattern: None,
            hook: Arc::new(hook),
        }
    }

    /// Create a matcher with a regex pattern
    ///
    /// Pattern examples:
    /// - `"billing"` - match only the billing agent
    /// - `"^support_"` - match every support agent
    pub fn with_pattern<H: Hook + 'static>(pattern: &str, hook: H) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
            hook: Arc::new(hook),
        })
    }

    /// Check if this matcher applies to an agent name
    pub fn matches(&self, name: &str) -> bool {
        match &self.pattern {
            Some(regex) => regex.is_match(name),
            None => true,
        }
    }

    /// Run the hook with the given context
    pub fn run(&self, ctx: &mut HookContext<'_>) {
        self.hook.call(ctx)
    }
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("pattern", &self.pattern.as_ref().map(|r| r.as_str()))
            .finish()
    }
}

/// Registry of lifecycle hooks for one agent
///
/// # Example
///
/// ```ignore
/// let mut hooks = HookRegistry::new();
///
/// hooks.add(HookEvent::Handoff, |ctx| {
///     tracing::info!("{} -> {:?}", ctx.agent, ctx.target);
/// });
///
/// // Strip a field before the agent sees it
/// hooks.add(HookEvent::AgentStart, |ctx| {
///     ctx.input.remove("debug");
/// });
/// ```
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookEvent, Vec<HookMatcher>>,
}

impl HookRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook that matches all agents
    pub fn add<H: Hook + 'static>(&mut self, event: HookEvent, hook: H) -> &mut Self {
        self.hooks
            .entry(event)
            .or_default()
            .push(HookMatcher::new(hook));
        self
    }

    /// Add a hook with an agent name pattern
    pub fn add_with_pattern<H: Hook + 'static>(
        &mut self,
        event: HookEvent,
        pattern: &str,
        hook: H,
    ) -> Result<&mut Self, regex::Error> {
        self.hooks
            .entry(event)
            .or_default()
            .push(HookMatcher::with_pattern(pattern, hook)?);
        Ok(self)
    }

    /// Check if there are any hooks for an event
    pub fn has_hooks(&self, event: HookEvent) -> bool {
        self.hooks.get(&event).is_some_and(|v| !v.is_empty())
    }

    /// Run all matching hooks for the context's event, in registration order
    pub fn run(&self, ctx: &mut HookContext<'_>) {
        let Some(matchers) = self.hooks.get(&ctx.event) else {
            return;
        };

        for matcher in matchers {
            if matcher.matches(ctx.subject()) {
                matcher.run(ctx);
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (event, matchers) in &self.hooks {
            map.entry(event, &matchers.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Message;
    use crate::runtime::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_hook_matcher_pattern() {
        let matcher = HookMatcher::with_pattern("billing|refunds", |_ctx: &mut HookContext| {}).unwrap();

        assert!(matcher.matches("billing"));
        assert!(matcher.matches("refunds"));
        assert!(!matcher.matches("triage"));
    }

    #[test]
    fn test_hook_matcher_no_pattern() {
        let matcher = HookMatcher::new(|_ctx: &mut HookContext| {});
        assert!(matcher.matches("anything"));
    }

    #[test]
    fn test_registry_add() {
        let mut registry = HookRegistry::new();

        registry.add(HookEvent::AgentStart, |_ctx: &mut HookContext| {});
        registry
            .add_with_pattern(HookEvent::AgentStart, "writer", |_ctx: &mut HookContext| {})
            .unwrap();

        assert!(registry.has_hooks(HookEvent::AgentStart));
        assert!(!registry.has_hooks(HookEvent::Handoff));
    }

    #[test]
    fn test_handoff_matches_target() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let mut registry = HookRegistry::new();
        registry
            .add_with_pattern(HookEvent::Handoff, "^billing$", move |_ctx: &mut HookContext| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let context = Context::new();
        let mut ctx = HookContext::handoff(&context, "triage", "billing", Message::new());
        registry.run(&mut ctx);
        let mut ctx = HookContext::handoff(&context, "triage", "sales", Message::new());
        registry.run(&mut ctx);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_hook_rewrites_input() {
        let mut registry = HookRegistry::new();
        registry.add(HookEvent::AgentStart, |ctx: &mut HookContext| {
            ctx.input.insert("tagged".into(), serde_json::json!(true));
        });

        let context = Context::new();
        let mut ctx = HookContext::agent_start(&context, "writer", Message::new());
        registry.run(&mut ctx);
        assert_eq!(ctx.input.get("tagged"), Some(&serde_json::json!(true)));
    }
}
