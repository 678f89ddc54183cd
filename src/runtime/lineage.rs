//! State shared by every Context of one lineage

use std::sync::Arc;

use parking_lot::Mutex;

use super::abort::AbortSignal;
use super::channels::{create_event_channel, EventReceiver, EventSender};
use super::events::{notify_observer, ContextEvent, Observer};
use crate::agent::{AgentRef, Memory};
use crate::core::{merge_into, ContextLimits, ContextStatus, Message, UsageLedger};
use crate::queue::MessageQueue;

/// Everything a child Context shares with its parent.
///
/// A reset builds a new `Lineage` that keeps the configuration (model,
/// skills, observer, limits, queue) but starts with fresh counters, a fresh
/// abort signal and a fresh event channel.
pub(crate) struct Lineage {
    pub(crate) model: Option<AgentRef>,
    pub(crate) skills: Vec<AgentRef>,
    pub(crate) observer: Option<Arc<dyn Observer>>,
    pub(crate) ledger: UsageLedger,
    pub(crate) abort: AbortSignal,
    pub(crate) queue: MessageQueue,
    user_context: Mutex<Message>,
    memories: Mutex<Vec<Memory>>,
    events: EventSender,
}

pub(crate) struct LineageSettings {
    pub(crate) model: Option<AgentRef>,
    pub(crate) skills: Vec<AgentRef>,
    pub(crate) observer: Option<Arc<dyn Observer>>,
    pub(crate) limits: ContextLimits,
    pub(crate) queue: MessageQueue,
    pub(crate) user_context: Message,
    pub(crate) memories: Vec<Memory>,
}

impl Lineage {
    pub(crate) fn new(settings: LineageSettings) -> Self {
        let timeout = settings.limits.timeout();
        Self {
            model: settings.model,
            skills: settings.skills,
            observer: settings.observer,
            ledger: UsageLedger::new(settings.limits),
            abort: AbortSignal::new(timeout),
            queue: settings.queue,
            user_context: Mutex::new(settings.user_context),
            memories: Mutex::new(settings.memories),
            events: create_event_channel(),
        }
    }

    /// Same configuration, fresh accounting
    pub(crate) fn reset(&self) -> Self {
        Self::new(LineageSettings {
            model: self.model.clone(),
            skills: self.skills.clone(),
            observer: self.observer.clone(),
            limits: *self.ledger.limits(),
            queue: self.queue.clone(),
            user_context: self.user_context(),
            memories: self.memories(),
        })
    }

    pub(crate) fn status(&self) -> ContextStatus {
        if self.abort.is_aborted() {
            ContextStatus::Timeout
        } else {
            ContextStatus::Normal
        }
    }

    pub(crate) fn user_context(&self) -> Message {
        self.user_context.lock().clone()
    }

    pub(crate) fn merge_user_context(&self, fields: &Message) {
        merge_into(&mut self.user_context.lock(), fields);
    }

    pub(crate) fn memories(&self) -> Vec<Memory> {
        self.memories.lock().clone()
    }

    pub(crate) fn add_memories(&self, memories: impl IntoIterator<Item = Memory>) {
        self.memories.lock().extend(memories);
    }

    pub(crate) fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Hand the event to the observer, then broadcast it
    pub(crate) fn emit(&self, event: ContextEvent) {
        if let Some(observer) = &self.observer {
            notify_observer(observer.as_ref(), &event);
        }
        // No receivers is the common case
        let _ = self.events.send(event);
    }
}
