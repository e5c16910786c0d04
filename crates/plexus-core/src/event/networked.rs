use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::event::codec::{decode_event, encode_event};
use crate::event::error::{EventSystemError, Result};
use crate::event::subscribers::{self, BusStats, BusStatsSnapshot, SubscriberTable};
use crate::event::transport::{Frame, Transport};
use crate::event::{BusMode, Event, EventBus, EventHandler, Revoke, SubscriptionHandle};
use crate::kernel::constants::{DEFAULT_HANDLER_TIMEOUT, DEFAULT_SUBJECT_PREFIX};

/// Tuning for a [`NetworkedBus`].
#[derive(Debug, Clone)]
pub struct NetworkedBusOptions {
    /// Broker subjects are `<subject_prefix>.<topic>`.
    pub subject_prefix: String,
    /// Upper bound on a single handler invocation for a delivered event.
    pub handler_timeout: Duration,
}

impl Default for NetworkedBusOptions {
    fn default() -> Self {
        Self {
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }
}

/// Local subscriber table plus the channel used to withdraw broker interest
/// once a topic loses its last local handler.
struct RemoteSubscriptions {
    table: SubscriberTable,
    withdraw: mpsc::UnboundedSender<String>,
}

impl Revoke for RemoteSubscriptions {
    fn revoke(&self, topic: &str, id: crate::event::SubscriptionId) -> bool {
        let (removed, now_empty) = self.table.remove(topic, id);
        if now_empty {
            // The receiver only disappears once the bus is closed, at which
            // point there is no broker interest left to withdraw.
            let _ = self.withdraw.send(topic.to_string());
        }
        removed
    }

    fn is_subscribed(&self, topic: &str, id: crate::event::SubscriptionId) -> bool {
        self.table.contains(topic, id)
    }
}

/// Event bus for microservice deployments.
///
/// Publishing encodes the event and hands it to the [`Transport`]; the call
/// returns as soon as the transport accepted the frame. Frames delivered by
/// the broker are decoded on a background task and fanned out to local
/// handlers concurrently, each bounded by the handler timeout.
///
/// Delivery is at-least-once and no ordering is promised to subscribers:
/// handlers must tolerate duplicates (see [`Event::id`]) and reordering.
pub struct NetworkedBus {
    transport: Arc<dyn Transport>,
    options: NetworkedBusOptions,
    subscriptions: Arc<RemoteSubscriptions>,
    // Serializes broker subscribe/unsubscribe calls against table changes.
    interest: Arc<Mutex<()>>,
    stats: Arc<BusStats>,
    closed: AtomicBool,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for NetworkedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkedBus")
            .field("transport", &self.transport)
            .field("options", &self.options)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl NetworkedBus {
    /// Connect `transport` and start the delivery and interest-withdrawal tasks.
    ///
    /// Fails with [`EventSystemError::BusUnavailable`] if the broker cannot be
    /// reached.
    pub async fn connect(transport: Arc<dyn Transport>, options: NetworkedBusOptions) -> Result<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        log::info!("Connecting networked event bus to {}", transport.endpoint());
        transport.connect(inbound_tx).await?;
        log::info!("Networked event bus connected to {}", transport.endpoint());

        let (withdraw_tx, withdraw_rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(RemoteSubscriptions {
            table: SubscriberTable::new(),
            withdraw: withdraw_tx,
        });
        let interest = Arc::new(Mutex::new(()));
        let stats = Arc::new(BusStats::default());

        let delivery = tokio::spawn(delivery_loop(
            inbound_rx,
            Arc::clone(&subscriptions),
            Arc::clone(&stats),
            options.handler_timeout,
        ));
        let withdrawal = tokio::spawn(withdrawal_loop(
            withdraw_rx,
            Arc::clone(&transport),
            Arc::clone(&subscriptions),
            Arc::clone(&interest),
            options.subject_prefix.clone(),
        ));

        Ok(Self {
            transport,
            options,
            subscriptions,
            interest,
            stats,
            closed: AtomicBool::new(false),
            tasks: StdMutex::new(vec![delivery, withdrawal]),
        })
    }

    pub fn options(&self) -> &NetworkedBusOptions {
        &self.options
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn subject_for(&self, topic: &str) -> String {
        subject_for(&self.options.subject_prefix, topic)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventSystemError::Closed);
        }
        if !self.transport.is_connected() {
            return Err(EventSystemError::unavailable(
                self.transport.endpoint(),
                "transport is not connected",
            ));
        }
        Ok(())
    }
}

fn subject_for(prefix: &str, topic: &str) -> String {
    format!("{}.{}", prefix, topic)
}

async fn delivery_loop(
    mut inbound: mpsc::UnboundedReceiver<Frame>,
    subscriptions: Arc<RemoteSubscriptions>,
    stats: Arc<BusStats>,
    handler_timeout: Duration,
) {
    while let Some(frame) = inbound.recv().await {
        let event = match decode_event(&frame.payload) {
            Ok(event) => Arc::new(event),
            Err(e) => {
                log::error!("Dropping undecodable frame on subject '{}': {}", frame.subject, e);
                continue;
            }
        };
        let targets = subscriptions.table.snapshot(event.topic());
        log::trace!(
            "Delivering event {} on '{}' to {} handler(s)",
            event.id(),
            event.topic(),
            targets.len()
        );
        for subscriber in targets {
            let event = Arc::clone(&event);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                subscribers::invoke(&subscriber, event, handler_timeout, &stats).await;
            });
        }
    }
    log::debug!("Networked bus delivery loop finished");
}

async fn withdrawal_loop(
    mut withdrawals: mpsc::UnboundedReceiver<String>,
    transport: Arc<dyn Transport>,
    subscriptions: Arc<RemoteSubscriptions>,
    interest: Arc<Mutex<()>>,
    prefix: String,
) {
    while let Some(topic) = withdrawals.recv().await {
        let _guard = interest.lock().await;
        // A new local subscriber may have arrived since the withdrawal was queued.
        if !subscriptions.table.snapshot(&topic).is_empty() {
            continue;
        }
        if let Err(e) = transport.unsubscribe(&subject_for(&prefix, &topic)).await {
            log::warn!("Failed to withdraw broker interest in '{}': {}", topic, e);
        }
    }
}

/// Broker subjects are dot-separated tokens; an empty topic or one with
/// whitespace has no subject the broker can match.
fn routable(topic: &str) -> bool {
    !topic.is_empty() && !topic.chars().any(char::is_whitespace)
}

#[async_trait]
impl EventBus for NetworkedBus {
    fn mode(&self) -> BusMode {
        BusMode::Networked
    }

    async fn publish(&self, event: Event) -> Result<()> {
        self.ensure_open()?;
        if !routable(event.topic()) {
            log::warn!("Dropping event {}: topic '{}' cannot be routed by the broker", event.id(), event.topic());
            return Ok(());
        }
        let frame = Frame::new(self.subject_for(event.topic()), encode_event(&event)?);
        self.transport.publish(frame).await?;
        self.stats.record_published();
        log::debug!("Event {} published on '{}'", event.id(), event.topic());
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        if !routable(topic) {
            return Err(EventSystemError::unavailable(
                self.transport.endpoint(),
                format!("broker cannot route subject '{}'", self.subject_for(topic)),
            ));
        }

        let _guard = self.interest.lock().await;
        let (id, first) = self.subscriptions.table.insert(topic, handler);
        if first {
            if let Err(e) = self.transport.subscribe(&self.subject_for(topic)).await {
                self.subscriptions.table.remove(topic, id);
                log::error!("Failed to subscribe to '{}' at {}: {}", topic, self.transport.endpoint(), e);
                return Err(e);
            }
            log::info!("Subscribed to '{}' via {}", topic, self.transport.endpoint());
        }

        let revoker: Arc<dyn Revoke> = self.subscriptions.clone();
        Ok(SubscriptionHandle::new(id, topic, Arc::downgrade(&revoker)))
    }

    fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.subscriptions.table.clear();
        let result = self.transport.close().await;
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        for task in tasks {
            task.abort();
        }
        log::info!("Networked event bus closed ({})", self.transport.endpoint());
        result
    }
}
