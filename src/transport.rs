//! Messaging collaborator contract.
//!
//! The pipeline never talks to a concrete middleware. It asks a [`Transport`] to deliver
//! messages of one type from one named topic to a callback, and tears that down again by
//! dropping the returned [`Subscription`]. [`LocalBus`] is an in-process implementation
//! used by the demo binary and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

#[allow(unused_imports)]
use log::{debug, info, trace, warn};

use crate::error::TransportError;

/// One delivered message. Cloning is cheap; the payload is shared, not copied.
#[derive(Debug, Clone)]
pub struct Message {
    pub type_name: Arc<str>,
    pub payload: Arc<[u8]>,
}

impl Message {
    pub fn new(type_name: &str, payload: impl Into<Arc<[u8]>>) -> Self {
        Self { type_name: Arc::from(type_name), payload: payload.into() }
    }
}

/// Callback invoked by the transport, on a thread of its choosing, for every message.
/// It must return quickly and must not call back into the transport.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

pub trait Transport: Send + Sync {
    fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
        on_message: MessageCallback,
    ) -> Result<SubscriptionId, TransportError>;

    /// Stop delivering to `id`. Once this returns, the callback registered under `id`
    /// is never invoked again. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    transport: Arc<dyn Transport>,
    id: SubscriptionId,
    topic: String,
}

impl Subscription {
    pub fn open(
        transport: &Arc<dyn Transport>,
        topic: &str,
        type_name: &str,
        on_message: MessageCallback,
    ) -> Result<Self, TransportError> {
        let id = transport.subscribe(topic, type_name, on_message)?;
        debug!("Subscribed to '{}' as {} ({:?})", topic, type_name, id);
        Ok(Self { transport: Arc::clone(transport), id, topic: topic.to_string() })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.transport.unsubscribe(self.id);
        debug!("Unsubscribed from '{}' ({:?})", self.topic, self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).field("topic", &self.topic).finish()
    }
}

struct Subscriber {
    id: SubscriptionId,
    type_name: String,
    callback: MessageCallback,
}

#[derive(Default)]
struct TopicEntry {
    advertised_type: Option<String>,
    subscribers: Vec<Subscriber>,
}

/// In-process message bus.
///
/// `publish` delivers synchronously on the publishing thread while holding the topic
/// table for reading; `unsubscribe` takes it for writing, so it waits for any delivery
/// in flight before returning.
#[derive(Default)]
pub struct LocalBus {
    topics: RwLock<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the message type carried by `topic`. Later subscriptions expecting another
    /// type are refused.
    pub fn advertise(&self, topic: &str, type_name: &str) {
        let mut topics = self.topics.write();
        topics.entry(topic.to_string()).or_default().advertised_type = Some(type_name.to_string());
    }

    /// Deliver a message to every subscriber of `topic` expecting `type_name`.
    /// Returns the number of callbacks invoked.
    pub fn publish(&self, topic: &str, type_name: &str, payload: impl Into<Arc<[u8]>>) -> usize {
        let message = Message::new(type_name, payload);
        let topics = self.topics.read();
        let Some(entry) = topics.get(topic) else {
            return 0;
        };
        let mut delivered = 0;
        for subscriber in &entry.subscribers {
            if subscriber.type_name == type_name {
                (subscriber.callback)(message.clone());
                delivered += 1;
            } else {
                trace!(
                    "Skipping {:?} on '{}': expects {}, got {}",
                    subscriber.id, topic, subscriber.type_name, type_name
                );
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |entry| entry.subscribers.len())
    }

    pub fn total_subscribers(&self) -> usize {
        self.topics.read().values().map(|entry| entry.subscribers.len()).sum()
    }

    /// Topic names with their advertised type, sorted by name.
    pub fn topics(&self) -> Vec<(String, Option<String>)> {
        let mut list: Vec<_> = self
            .topics
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.advertised_type.clone()))
            .collect();
        list.sort();
        list
    }
}

impl Transport for LocalBus {
    fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
        on_message: MessageCallback,
    ) -> Result<SubscriptionId, TransportError> {
        if topic.trim().is_empty() || topic.contains(char::is_whitespace) {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        let mut topics = self.topics.write();
        let entry = topics.entry(topic.to_string()).or_default();
        if let Some(advertised) = &entry.advertised_type {
            if advertised != type_name {
                return Err(TransportError::TypeMismatch {
                    topic: topic.to_string(),
                    advertised: advertised.clone(),
                    expected: type_name.to_string(),
                });
            }
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entry.subscribers.push(Subscriber { id, type_name: type_name.to_string(), callback: on_message });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut topics = self.topics.write();
        for entry in topics.values_mut() {
            entry.subscribers.retain(|subscriber| subscriber.id != id);
        }
    }
}
