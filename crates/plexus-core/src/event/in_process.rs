use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::event::error::{EventSystemError, Result};
use crate::event::subscribers::{self, BusStats, BusStatsSnapshot, SubscriberTable};
use crate::event::{BusMode, Event, EventBus, EventHandler, Revoke, SubscriptionHandle};
use crate::kernel::constants::DEFAULT_HANDLER_TIMEOUT;

//--------------------------------------------------
// InProcessBus
//--------------------------------------------------

/// Event bus for monolithic deployments.
///
/// `publish` dispatches synchronously on the calling task: handlers run one
/// after another in subscription order, each on its own spawned task bounded
/// by the handler timeout. A slow or panicking handler is counted and logged
/// and the remaining handlers still receive the event.
pub struct InProcessBus {
    subscribers: Arc<SubscriberTable>,
    handler_timeout: Duration,
    stats: BusStats,
    closed: AtomicBool,
}

impl fmt::Debug for InProcessBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessBus")
            .field("subscribers", &self.subscribers)
            .field("handler_timeout", &self.handler_timeout)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::with_handler_timeout(DEFAULT_HANDLER_TIMEOUT)
    }

    pub fn with_handler_timeout(handler_timeout: Duration) -> Self {
        Self {
            subscribers: Arc::new(SubscriberTable::new()),
            handler_timeout,
            stats: BusStats::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Number of live subscriptions across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.subscriber_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    fn mode(&self) -> BusMode {
        BusMode::InProcess
    }

    async fn publish(&self, event: Event) -> Result<()> {
        if self.is_closed() {
            return Err(EventSystemError::Closed);
        }
        self.stats.record_published();

        let targets = self.subscribers.snapshot(event.topic());
        if targets.is_empty() {
            log::trace!("No subscribers for topic '{}'", event.topic());
            return Ok(());
        }

        let event = Arc::new(event);
        for subscriber in &targets {
            // A subscriber revoked by an earlier handler in this same dispatch
            // must not be invoked.
            if !self.subscribers.contains(event.topic(), subscriber.id) {
                continue;
            }
            subscribers::invoke(subscriber, Arc::clone(&event), self.handler_timeout, &self.stats).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<SubscriptionHandle> {
        if self.is_closed() {
            return Err(EventSystemError::Closed);
        }
        let (id, _) = self.subscribers.insert(topic, handler);
        log::debug!("Subscribed {} to topic '{}'", id, topic);
        let table: Arc<dyn Revoke> = self.subscribers.clone();
        Ok(SubscriptionHandle::new(id, topic, Arc::downgrade(&table)))
    }

    fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.subscribers.clear();
            log::info!("In-process event bus closed");
        }
        Ok(())
    }
}
