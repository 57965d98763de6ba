//! Named-topic message broker
//!
//! Key principles:
//! - Topics are addressed by name at the API boundary; ids are assigned on
//!   first use and stay stable for the broker's lifetime
//! - Delivery is synchronous, in subscription order, with no history
//! - Payloads are type-erased (`Arc<dyn Any + Send + Sync>`)
//! - The broker lock is never held while callbacks run, so a callback may
//!   publish, subscribe or unsubscribe
//!
//! The broker is an explicit context object: the pipeline and every
//! component receive an `Arc<MessageBroker>` at construction.

pub mod topics;

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased event payload
pub type EventPayload = Arc<dyn Any + Send + Sync>;

/// Subscriber callback
pub type EventCallback = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Opaque topic identifier, assigned by [`MessageBroker::register_topic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId(u32);

impl TopicId {
    /// Raw id value (starts at 1)
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by [`MessageBroker::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    callback: EventCallback,
}

#[derive(Default)]
struct BrokerState {
    topic_ids: HashMap<String, TopicId>,
    topic_names: Vec<String>,
    subscribers: HashMap<TopicId, Vec<Subscription>>,
    owners: HashMap<SubscriptionId, TopicId>,
    next_subscription: u64,
}

impl BrokerState {
    fn register(&mut self, name: &str) -> (TopicId, bool) {
        if let Some(id) = self.topic_ids.get(name) {
            return (*id, false);
        }

        self.topic_names.push(name.to_owned());
        let id = TopicId(self.topic_names.len() as u32);
        self.topic_ids.insert(name.to_owned(), id);
        (id, true)
    }
}

/// Process-wide publish/subscribe hub
#[derive(Default)]
pub struct MessageBroker {
    state: RwLock<BrokerState>,
}

impl MessageBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty broker ready to be shared
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a topic, returning its id. Registering an existing name
    /// returns the id it already has.
    pub fn register_topic(&self, name: &str) -> TopicId {
        if let Some(id) = self.topic_id(name) {
            return id;
        }

        let (id, created) = self.state.write().register(name);
        if created {
            log::debug!("Registered topic '{}' as {}", name, id);
        }
        id
    }

    /// Look up a topic id without registering it
    pub fn topic_id(&self, name: &str) -> Option<TopicId> {
        self.state.read().topic_ids.get(name).copied()
    }

    /// Name of a registered topic
    pub fn topic_name(&self, id: TopicId) -> Option<String> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.state.read().topic_names.get(index).cloned()
    }

    /// Subscribe to a topic by name, registering it on first use
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let mut state = self.state.write();
        let (topic_id, _) = state.register(topic);

        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state
            .subscribers
            .entry(topic_id)
            .or_default()
            .push(Subscription {
                id,
                callback: Arc::new(callback),
            });
        state.owners.insert(id, topic_id);

        log::debug!("Subscription {:?} added to '{}'", id, topic);
        id
    }

    /// Subscribe with a typed callback.
    ///
    /// Payloads that are not a `T` are logged and skipped.
    pub fn subscribe_event<T, F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let topic_name = topic.to_owned();
        self.subscribe(topic, move |payload| match (**payload).downcast_ref::<T>() {
            Some(event) => callback(event),
            None => log::warn!(
                "Skipping payload on '{}': expected {}",
                topic_name,
                std::any::type_name::<T>()
            ),
        })
    }

    /// Remove exactly one subscription. Returns false if it was unknown.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.state.write();
        let Some(topic) = state.owners.remove(&subscription) else {
            return false;
        };

        if let Some(list) = state.subscribers.get_mut(&topic) {
            list.retain(|s| s.id != subscription);
        }
        log::debug!("Subscription {:?} removed from {}", subscription, topic);
        true
    }

    /// Publish a payload to a topic by name, registering the topic if needed
    pub fn publish(&self, topic: &str, payload: EventPayload) -> TopicId {
        let id = self.register_topic(topic);
        self.publish_to(id, payload);
        id
    }

    /// Publish a typed event
    pub fn publish_event<T>(&self, topic: &str, event: T) -> TopicId
    where
        T: Any + Send + Sync,
    {
        let payload: EventPayload = Arc::new(event);
        self.publish(topic, payload)
    }

    /// Publish a payload to an already-registered topic id
    pub fn publish_to(&self, topic: TopicId, payload: EventPayload) {
        // Snapshot so callbacks can re-enter the broker
        let callbacks: Vec<EventCallback> = {
            let state = self.state.read();
            state
                .subscribers
                .get(&topic)
                .map(|list| list.iter().map(|s| Arc::clone(&s.callback)).collect())
                .unwrap_or_default()
        };

        if callbacks.is_empty() {
            log::trace!("Publish to {} with no subscribers", topic);
            return;
        }

        log::trace!("Publish to {} ({} subscribers)", topic, callbacks.len());
        for callback in callbacks {
            callback(&payload);
        }
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.state.read();
        state
            .topic_ids
            .get(topic)
            .and_then(|id| state.subscribers.get(id))
            .map_or(0, Vec::len)
    }

    /// Number of registered topics
    pub fn topic_count(&self) -> usize {
        self.state.read().topic_names.len()
    }
}

impl fmt::Debug for MessageBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MessageBroker")
            .field("topics", &state.topic_names.len())
            .field("subscriptions", &state.owners.len())
            .finish()
    }
}
