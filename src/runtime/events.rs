//! Lifecycle events and observers
//!
//! Every agent call emits `AgentStarted` and then `AgentSucceed` or
//! `AgentFailed` on the lineage's broadcast channel. The optional
//! [`Observer`] sees the same events; its failures are logged and never
//! fail the invoke.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::{Message, ProgressChunk, ProgressEvent};

/// What happened to an agent call
#[derive(Debug, Clone)]
pub enum ContextEventKind {
    /// `process` is about to run
    AgentStarted {
        /// Input after start hooks
        input: Message,
    },
    /// The call finished
    AgentSucceed {
        /// Resolved output
        output: Message,
    },
    /// The call failed
    AgentFailed {
        /// Error description
        error: String,
    },
}

/// Lifecycle event of one agent call
#[derive(Debug, Clone)]
pub struct ContextEvent {
    /// Context that ran the call
    pub context_id: String,
    /// Ids from the lineage root down to `context_id`
    pub ancestry: Arc<[String]>,
    /// Id of the call
    pub task_id: String,
    /// Agent name
    pub agent: String,
    /// Agent that issued the invoke, if known
    pub source_agent: Option<String>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Payload
    pub kind: ContextEventKind,
}

impl ContextEvent {
    /// Whether the event happened in `context_id` or one of its descendants
    pub fn is_within(&self, context_id: &str) -> bool {
        self.ancestry.iter().any(|id| id == context_id)
    }

    /// Check if this is a start event
    pub fn is_start(&self) -> bool {
        matches!(self.kind, ContextEventKind::AgentStarted { .. })
    }

    /// Convert into a caller-facing progress chunk
    pub fn to_progress(&self) -> ProgressChunk {
        let event = match &self.kind {
            ContextEventKind::AgentStarted { input } => ProgressEvent::Start {
                input: input.clone(),
            },
            ContextEventKind::AgentSucceed { output } => ProgressEvent::End {
                output: output.clone(),
            },
            ContextEventKind::AgentFailed { error } => ProgressEvent::Failed {
                error: error.clone(),
            },
        };
        ProgressChunk {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            timestamp: self.timestamp,
            agent: self.agent.clone(),
            event,
        }
    }
}

/// Tracing sink notified of lifecycle events
pub trait Observer: Send + Sync {
    /// Called when an agent call starts
    fn record(&self, event: &ContextEvent) -> anyhow::Result<()>;

    /// Called when an agent call succeeds or fails
    fn update(&self, event: &ContextEvent) -> anyhow::Result<()>;
}

/// Observer that writes every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn record(&self, event: &ContextEvent) -> anyhow::Result<()> {
        tracing::info!(
            agent = %event.agent,
            task_id = %event.task_id,
            context_id = %event.context_id,
            "[Observer] agent started"
        );
        Ok(())
    }

    fn update(&self, event: &ContextEvent) -> anyhow::Result<()> {
        match &event.kind {
            ContextEventKind::AgentFailed { error } => tracing::warn!(
                agent = %event.agent,
                task_id = %event.task_id,
                error = %error,
                "[Observer] agent failed"
            ),
            _ => tracing::info!(
                agent = %event.agent,
                task_id = %event.task_id,
                "[Observer] agent succeeded"
            ),
        }
        Ok(())
    }
}

/// Hand an event to the observer; errors and panics are logged only
pub(crate) fn notify_observer(observer: &dyn Observer, event: &ContextEvent) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        if event.is_start() {
            observer.record(event)
        } else {
            observer.update(event)
        }
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(agent = %event.agent, error = %err, "[Observer] failed to record event")
        }
        Err(_) => tracing::warn!(agent = %event.agent, "[Observer] panicked while recording event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ContextEventKind) -> ContextEvent {
        ContextEvent {
            context_id: "child".into(),
            ancestry: Arc::from(vec!["root".to_string(), "child".to_string()]),
            task_id: "task".into(),
            agent: "writer".into(),
            source_agent: None,
            timestamp: Utc::now(),
            kind,
        }
    }

    struct FailingObserver;

    impl Observer for FailingObserver {
        fn record(&self, _event: &ContextEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }

        fn update(&self, _event: &ContextEvent) -> anyhow::Result<()> {
            panic!("sink exploded")
        }
    }

    #[test]
    fn test_is_within_ancestry() {
        let e = event(ContextEventKind::AgentStarted {
            input: Message::new(),
        });
        assert!(e.is_within("root"));
        assert!(e.is_within("child"));
        assert!(!e.is_within("sibling"));
    }

    #[test]
    fn test_to_progress() {
        let e = event(ContextEventKind::AgentFailed {
            error: "boom".into(),
        });
        let progress = e.to_progress();
        assert_eq!(progress.agent, "writer");
        assert_eq!(
            progress.event,
            ProgressEvent::Failed {
                error: "boom".into()
            }
        );
    }

    #[test]
    fn test_observer_failures_are_swallowed() {
        let observer = FailingObserver;
        notify_observer(
            &observer,
            &event(ContextEventKind::AgentStarted {
                input: Message::new(),
            }),
        );
        notify_observer(
            &observer,
            &event(ContextEventKind::AgentSucceed {
                output: Message::new(),
            }),
        );
    }
}
