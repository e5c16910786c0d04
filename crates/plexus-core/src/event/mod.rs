//! # Plexus Event Bus
//!
//! Publish/subscribe messaging between plugins. The [`EventBus`] trait is the
//! only thing plugins (through their [`KernelHandle`](crate::kernel::KernelHandle))
//! ever see; which implementation sits behind it is a deployment decision:
//!
//! - [`InProcessBus`]: direct in-memory dispatch for monolithic deployments.
//!   `publish` runs every handler before returning, in subscription order,
//!   each bounded by a per-handler timeout. At-most-once.
//! - [`NetworkedBus`]: broker-backed dispatch for microservice deployments.
//!   `publish` returns once the event is handed to the [`Transport`]; remote
//!   delivery is at-least-once and unordered across subscriber instances, so
//!   handlers must be idempotent (use [`Event::id`] to de-duplicate).
//!
//! Neither implementation replays events published before a subscription was
//! taken.
pub mod codec;
pub mod error;
pub mod in_process;
pub mod networked;
pub mod subscribers;
pub mod tcp;
pub mod transport;
pub mod types;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::error::Result;

/// Deployment mode, selecting which bus implementation the kernel builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusMode {
    #[default]
    #[serde(alias = "monolithic", alias = "in_process")]
    InProcess,
    #[serde(alias = "microservice")]
    Networked,
}

impl fmt::Display for BusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusMode::InProcess => write!(f, "in-process"),
            BusMode::Networked => write!(f, "networked"),
        }
    }
}

impl std::str::FromStr for BusMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-process" | "in_process" | "monolithic" => Ok(BusMode::InProcess),
            "networked" | "microservice" => Ok(BusMode::Networked),
            other => Err(format!("unknown bus mode '{}'", other)),
        }
    }
}

/// An immutable message published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    topic: String,
    producer: String,
    created_at: DateTime<Utc>,
    #[serde(with = "codec::base64_bytes")]
    payload: Vec<u8>,
}

impl Event {
    pub fn new(topic: impl Into<String>, producer: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            producer: producer.into(),
            created_at: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Build an event whose payload is the JSON encoding of `value`.
    pub fn json<T: Serialize>(topic: impl Into<String>, producer: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(topic, producer, serde_json::to_vec(value)?))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decode the payload as JSON.
    pub fn payload_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Asynchronous event handler.
///
/// Handlers receive a shared reference to the event; the event cannot be
/// mutated once published.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<Event>);
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) {
        (self.f)(event).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Runs a synchronous closure on the blocking pool, so a handler that blocks
/// never ties up a runtime worker and the per-handler timeout still holds.
struct BlockingHandler<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> EventHandler for BlockingHandler<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    async fn handle(&self, event: Arc<Event>) {
        let f = Arc::clone(&self.f);
        if let Err(join_err) = tokio::task::spawn_blocking(move || (*f)(&event)).await {
            if join_err.is_panic() {
                std::panic::resume_unwind(join_err.into_panic());
            }
        }
    }
}

/// Wrap a synchronous closure as an [`EventHandler`].
///
/// The closure runs on tokio's blocking pool. If it overruns the bus handler
/// timeout the publisher moves on; the closure itself cannot be interrupted
/// and finishes in the background.
pub fn sync_handler<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(BlockingHandler { f: Arc::new(f) })
}

/// Identifier of a single subscription, unique within one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Removes subscriptions on behalf of a [`SubscriptionHandle`].
pub(crate) trait Revoke: Send + Sync {
    fn revoke(&self, topic: &str, id: SubscriptionId) -> bool;
    fn is_subscribed(&self, topic: &str, id: SubscriptionId) -> bool;
}

/// Handle returned by [`EventBus::subscribe`].
///
/// The handle only holds a weak reference to the bus: a handle that outlives
/// its bus simply reports itself inactive.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
    revoker: Weak<dyn Revoke>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, topic: impl Into<String>, revoker: Weak<dyn Revoke>) -> Self {
        Self {
            id,
            topic: topic.into(),
            revoker,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.revoker.upgrade() {
            Some(revoker) => revoker.revoke(&self.topic, self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        match self.revoker.upgrade() {
            Some(revoker) => revoker.is_subscribed(&self.topic, self.id),
            None => false,
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Abstract publish/subscribe transport shared by both deployment modes.
#[async_trait]
pub trait EventBus: Send + Sync + fmt::Debug {
    fn mode(&self) -> BusMode;

    /// Deliver `event` to every active subscription on its topic.
    ///
    /// Publishing to a topic nobody subscribes to is a no-op, not an error.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Register `handler` for `topic`. Events published before this call
    /// are never delivered to the new subscription.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<SubscriptionHandle>;

    /// Counters describing traffic seen by this bus instance.
    fn stats(&self) -> BusStatsSnapshot;

    /// Stop accepting events and release transport resources.
    async fn close(&self) -> Result<()>;
}

pub use codec::{decode_event, encode_event};
pub use error::EventSystemError as Error;
pub use in_process::InProcessBus;
pub use networked::{NetworkedBus, NetworkedBusOptions};
pub use subscribers::{BusStats, BusStatsSnapshot};
pub use tcp::{TcpBroker, TcpTransport, TcpTransportOptions};
pub use transport::{Frame, MemoryBroker, MemoryTransport, Transport};
pub use types::KernelEvent;

// Test module declaration
#[cfg(test)]
mod tests;
