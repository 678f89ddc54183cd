//! Hooks Module
//!
//! Observe and adjust agent calls at key points of their lifecycle.
//!
//! # Hook Events
//!
//! | Event | When | Can modify |
//! |-------|------|------------|
//! | `AgentStart` | Before `process` runs | `input` |
//! | `AgentEnd` | After `process` succeeded or failed | nothing |
//! | `Handoff` | The agent transferred the call | nothing |
//!
//! Handoff hooks are a side-effect point only. They run synchronously
//! before the transfer and cannot veto it.

mod registry;
mod types;

pub use registry::{ArcHook, Hook, HookMatcher, HookRegistry};
pub use types::{HookContext, HookEvent};
