//! Topic-based message queue
//!
//! One `MessageQueue` is shared by every Context of a lineage (and survives
//! a reset). Listeners are plain callbacks invoked synchronously by
//! `publish`, once per matching subscription, outside the queue's lock.
//!
//! - `MessageQueue` - publish / subscribe / unsubscribe / next
//! - `Subscription` - handle that removes its listener
//! - `NextMessage` - future for the next message on some topics
//! - `wiring` - agents bound to input and output topics

pub mod wiring;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::core::{Message, RuntimeError, RuntimeResult};
use crate::runtime::Context;

pub use wiring::{TopicBinding, WiredAgent};

/// Who published a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    /// A human or an external caller
    #[default]
    User,
    /// An agent's output
    Agent,
}

/// What listeners receive
#[derive(Debug, Clone)]
pub struct MessagePayload {
    /// Publisher role
    pub role: Role,
    /// Name of the publishing agent, if any
    pub source: Option<String>,
    /// The message
    pub message: Message,
    /// Context the message was published from
    pub context: Context,
}

/// One or more topic names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topics(Vec<String>);

impl Topics {
    /// Iterate over the topic names
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether there are no topics
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Topics {
    fn from(topic: &str) -> Self {
        Topics(vec![topic.to_string()])
    }
}

impl From<String> for Topics {
    fn from(topic: String) -> Self {
        Topics(vec![topic])
    }
}

impl From<Vec<String>> for Topics {
    fn from(topics: Vec<String>) -> Self {
        Topics(topics)
    }
}

impl From<Vec<&str>> for Topics {
    fn from(topics: Vec<&str>) -> Self {
        Topics(topics.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Topics {
    fn from(topics: [&str; N]) -> Self {
        Topics(topics.iter().map(|t| t.to_string()).collect())
    }
}

/// Id of a subscription within its queue
pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&MessagePayload) + Send + Sync>;

#[derive(Default)]
struct QueueInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<(SubscriptionId, Listener)>>>,
}

impl QueueInner {
    fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(topic);
        }
        removed
    }
}

/// Shared publish/subscribe queue
#[derive(Clone, Default)]
pub struct MessageQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("topics", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every listener of every topic.
    ///
    /// Returns the number of listener calls made.
    pub fn publish(&self, topics: impl Into<Topics>, payload: MessagePayload) -> usize {
        let topics = topics.into();
        let mut delivered = 0;
        for topic in topics.iter() {
            // Snapshot so listeners may subscribe or publish re-entrantly
            let listeners: Vec<Listener> = self
                .inner
                .listeners
                .lock()
                .get(topic)
                .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default();

            tracing::debug!("[MessageQueue] Publishing to '{}' ({} listeners)", topic, listeners.len());
            for listener in listeners {
                listener(&payload);
                delivered += 1;
            }
        }
        delivered
    }

    /// Register `listener` on every topic
    pub fn subscribe<F>(&self, topics: impl Into<Topics>, listener: F) -> Subscription
    where
        F: Fn(&MessagePayload) + Send + Sync + 'static,
    {
        let topics = topics.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        {
            let mut listeners = self.inner.listeners.lock();
            for topic in topics.iter() {
                listeners
                    .entry(topic.to_string())
                    .or_default()
                    .push((id, listener.clone()));
            }
        }
        Subscription {
            id,
            topics,
            queue: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Remove a listener from one topic; unknown ids are ignored
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.inner.remove(topic, id)
    }

    /// Wait for the next message on any of `topics`.
    ///
    /// The listener is registered before this returns, so a message
    /// published right after the call is not missed.
    pub fn next(&self, topics: impl Into<Topics>) -> NextMessage {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let subscription = self.subscribe(topics, move |payload| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(payload.clone());
            }
        });
        NextMessage { rx, subscription }
    }

    /// Number of listeners registered on `topic`
    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .get(topic)
            .map_or(0, |entries| entries.len())
    }
}

/// Handle returned by `subscribe`
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topics: Topics,
    queue: Weak<QueueInner>,
    active: AtomicBool,
}

impl Subscription {
    /// Id of the listener
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topics the listener is registered on
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Remove the listener from every topic. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.queue.upgrade() {
            for topic in self.topics.iter() {
                inner.remove(topic, self.id);
            }
        }
    }
}

/// Future returned by [`MessageQueue::next`]
///
/// Unsubscribes once resolved or dropped.
pub struct NextMessage {
    rx: oneshot::Receiver<MessagePayload>,
    subscription: Subscription,
}

impl Future for NextMessage {
    type Output = RuntimeResult<MessagePayload>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.subscription.unsubscribe();
                Poll::Ready(result.map_err(|_| RuntimeError::ChannelClosed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for NextMessage {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::text_message;
    use std::sync::atomic::AtomicUsize;

    fn payload(text: &str) -> MessagePayload {
        MessagePayload {
            role: Role::User,
            source: None,
            message: text_message("message", text),
            context: Context::new(),
        }
    }

    #[test]
    fn test_publish_delivers_once_per_listener() {
        let queue = MessageQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = queue.subscribe("inbox", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(queue.publish("inbox", payload("hi")), 1);
        assert_eq!(queue.publish("other", payload("hi")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let queue = MessageQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = queue.subscribe(["a", "b"], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(queue.publish(["a", "b"], payload("x")), 2);
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(queue.publish(["a", "b"], payload("x")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let queue = MessageQueue::new();
        assert!(!queue.unsubscribe("nowhere", 42));
    }

    #[tokio::test]
    async fn test_next_resolves_with_first_message() {
        let queue = MessageQueue::new();
        let next = queue.next("replies");
        assert_eq!(queue.listener_count("replies"), 1);

        queue.publish("replies", payload("first"));
        queue.publish("replies", payload("second"));

        let received = next.await.unwrap();
        assert_eq!(received.message.get("message").and_then(|v| v.as_str()), Some("first"));
        assert_eq!(queue.listener_count("replies"), 0);
    }

    #[test]
    fn test_dropped_next_unsubscribes() {
        let queue = MessageQueue::new();
        let next = queue.next("replies");
        drop(next);
        assert_eq!(queue.listener_count("replies"), 0);
    }
}
