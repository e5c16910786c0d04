//! Subscriber bookkeeping and guarded handler invocation shared by both bus
//! implementations.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::event::error::EventSystemError;
use crate::event::{Event, EventHandler, Revoke, SubscriptionId};

/// One registered handler.
#[derive(Clone)]
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) handler: Arc<dyn EventHandler>,
}

/// Concurrency-safe topic → subscribers table.
///
/// The lock is only held to add, remove or snapshot entries, never while a
/// handler runs, so handlers may freely subscribe or unsubscribe.
pub(crate) struct SubscriberTable {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriberTable {
    pub(crate) fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a handler to `topic`. Returns the id and whether it is the first
    /// subscriber on that topic.
    pub(crate) fn insert(&self, topic: &str, handler: Arc<dyn EventHandler>) -> (SubscriptionId, bool) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let subscribers = topics.entry(topic.to_string()).or_default();
        let first = subscribers.is_empty();
        subscribers.push(Subscriber { id, handler });
        (id, first)
    }

    /// Remove a handler. Returns `(removed, topic_now_empty)`.
    pub(crate) fn remove(&self, topic: &str, id: SubscriptionId) -> (bool, bool) {
        let mut topics = self.topics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(subscribers) = topics.get_mut(topic) else {
            return (false, false);
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() < before;
        let empty = subscribers.is_empty();
        if empty {
            topics.remove(topic);
        }
        (removed, removed && empty)
    }

    pub(crate) fn contains(&self, topic: &str, id: SubscriptionId) -> bool {
        let topics = self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .get(topic)
            .is_some_and(|subscribers| subscribers.iter().any(|s| s.id == id))
    }

    /// Subscribers of `topic` in subscription order.
    pub(crate) fn snapshot(&self, topic: &str) -> Vec<Subscriber> {
        let topics = self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.get(topic).cloned().unwrap_or_default()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        let topics = self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.values().map(Vec::len).sum()
    }

    pub(crate) fn clear(&self) {
        let mut topics = self.topics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.clear();
    }
}

impl Revoke for SubscriberTable {
    fn revoke(&self, topic: &str, id: SubscriptionId) -> bool {
        self.remove(topic, id).0
    }

    fn is_subscribed(&self, topic: &str, id: SubscriptionId) -> bool {
        self.contains(topic, id)
    }
}

impl fmt::Debug for SubscriberTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberTable")
            .field("subscriber_count", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Live traffic counters for a bus.
#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    handler_timeouts: AtomicU64,
    handler_panics: AtomicU64,
}

/// Point-in-time copy of [`BusStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub handler_timeouts: u64,
    pub handler_panics: u64,
}

impl BusStats {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one guarded handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    TimedOut,
    Panicked,
}

/// Run one handler on its own task, bounded by `timeout`.
///
/// A handler that overruns is aborted and counted; the timeout is logged as
/// [`EventSystemError::HandlerTimeout`] and never propagated to the publisher.
pub(crate) async fn invoke(
    subscriber: &Subscriber,
    event: Arc<Event>,
    timeout: Duration,
    stats: &BusStats,
) -> Delivery {
    let handler = Arc::clone(&subscriber.handler);
    let topic = event.topic().to_string();
    let mut task = tokio::spawn(async move { handler.handle(event).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
            Delivery::Delivered
        }
        Ok(Err(join_err)) => {
            stats.handler_panics.fetch_add(1, Ordering::Relaxed);
            log::error!("Handler {} on topic '{}' failed: {}", subscriber.id, topic, join_err);
            Delivery::Panicked
        }
        Err(_) => {
            task.abort();
            stats.handler_timeouts.fetch_add(1, Ordering::Relaxed);
            let err = EventSystemError::HandlerTimeout {
                topic,
                subscription: subscriber.id,
                timeout,
            };
            log::warn!("{}", err);
            Delivery::TimedOut
        }
    }
}
