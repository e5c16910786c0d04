//! Transport abstraction under the [`NetworkedBus`](crate::event::NetworkedBus).
//!
//! A transport moves opaque [`Frame`]s between processes through some broker.
//! It knows nothing about handlers or topics beyond the subject strings it is
//! asked to route; the networked bus owns subscriber bookkeeping and decoding.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::event::error::{EventSystemError, Result};

/// A routed message: broker subject plus encoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }
}

/// Connection to a message broker.
///
/// `connect` hands the transport the channel on which it must push every
/// frame the broker delivers for subjects this connection subscribed to.
/// Implementations must fail `connect`/`subscribe` with
/// [`EventSystemError::BusUnavailable`] when the broker cannot be reached.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Broker address, used in logs and errors.
    fn endpoint(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn connect(&self, inbound: mpsc::UnboundedSender<Frame>) -> Result<()>;

    /// Hand a frame to the broker. Returns once the frame is queued, not
    /// once it is delivered.
    async fn publish(&self, frame: Frame) -> Result<()>;

    async fn subscribe(&self, subject: &str) -> Result<()>;

    async fn unsubscribe(&self, subject: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

//--------------------------------------------------
// MemoryBroker (several "processes" in one address space)
//--------------------------------------------------

struct BrokerConnection {
    subjects: HashSet<String>,
    inbound: mpsc::UnboundedSender<Frame>,
}

/// Broker simulation shared by several [`MemoryTransport`]s.
///
/// Each transport behaves like a separate process connected to the same
/// broker. Availability can be switched off to exercise `BusUnavailable`
/// paths, and duplicate delivery can be switched on to exercise
/// at-least-once handling.
pub struct MemoryBroker {
    name: String,
    available: AtomicBool,
    duplicate_delivery: AtomicBool,
    connections: Mutex<HashMap<u64, BrokerConnection>>,
    next_connection: AtomicU64,
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("name", &self.name)
            .field("available", &self.is_available())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl MemoryBroker {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            available: AtomicBool::new(true),
            duplicate_delivery: AtomicBool::new(false),
            connections: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Create a transport attached to this broker.
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            endpoint: format!("memory://{}", self.name),
            broker: Arc::clone(self),
            connection: Mutex::new(None),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Deliver every frame twice, as a redelivering broker might.
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.duplicate_delivery.store(duplicate, Ordering::Release);
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, BrokerConnection>> {
        self.connections.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unavailable(&self, reason: &str) -> EventSystemError {
        EventSystemError::unavailable(format!("memory://{}", self.name), reason)
    }

    fn attach(&self, inbound: mpsc::UnboundedSender<Frame>) -> Result<u64> {
        if !self.is_available() {
            return Err(self.unavailable("broker is not accepting connections"));
        }
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            BrokerConnection {
                subjects: HashSet::new(),
                inbound,
            },
        );
        Ok(id)
    }

    fn detach(&self, connection: u64) {
        self.lock().remove(&connection);
    }

    fn set_interest(&self, connection: u64, subject: &str, interested: bool) -> Result<()> {
        if !self.is_available() {
            return Err(self.unavailable("broker is not reachable"));
        }
        let mut connections = self.lock();
        let Some(conn) = connections.get_mut(&connection) else {
            return Err(self.unavailable("connection is closed"));
        };
        if interested {
            conn.subjects.insert(subject.to_string());
        } else {
            conn.subjects.remove(subject);
        }
        Ok(())
    }

    fn route(&self, frame: Frame) -> Result<usize> {
        if !self.is_available() {
            return Err(self.unavailable("broker is not reachable"));
        }
        let copies = if self.duplicate_delivery.load(Ordering::Acquire) { 2 } else { 1 };
        let mut connections = self.lock();
        let mut routed = 0;
        // Connections whose receiving side is gone are dropped here.
        connections.retain(|_, conn| {
            if !conn.subjects.contains(&frame.subject) {
                return true;
            }
            for _ in 0..copies {
                if conn.inbound.send(frame.clone()).is_err() {
                    return false;
                }
                routed += 1;
            }
            true
        });
        Ok(routed)
    }
}

/// One connection to a [`MemoryBroker`].
pub struct MemoryTransport {
    endpoint: String,
    broker: Arc<MemoryBroker>,
    connection: Mutex<Option<u64>>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("endpoint", &self.endpoint)
            .field("connection", &self.connection_id())
            .finish()
    }
}

impl MemoryTransport {
    fn connection_id(&self) -> Option<u64> {
        *self.connection.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_connection(&self) -> Result<u64> {
        self.connection_id()
            .ok_or_else(|| EventSystemError::unavailable(self.endpoint.clone(), "transport is not connected"))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connection_id().is_some() && self.broker.is_available()
    }

    async fn connect(&self, inbound: mpsc::UnboundedSender<Frame>) -> Result<()> {
        let id = self.broker.attach(inbound)?;
        let previous = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(id);
        if let Some(previous) = previous {
            self.broker.detach(previous);
        }
        Ok(())
    }

    async fn publish(&self, frame: Frame) -> Result<()> {
        self.require_connection()?;
        self.broker.route(frame).map(|_| ())
    }

    async fn subscribe(&self, subject: &str) -> Result<()> {
        let id = self.require_connection()?;
        self.broker.set_interest(id, subject, true)
    }

    async fn unsubscribe(&self, subject: &str) -> Result<()> {
        let id = self.require_connection()?;
        self.broker.set_interest(id, subject, false)
    }

    async fn close(&self) -> Result<()> {
        let taken = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(id) = taken {
            self.broker.detach(id);
        }
        Ok(())
    }
}
