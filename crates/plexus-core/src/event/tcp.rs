//! Reference TCP transport and broker.
//!
//! Frames on the wire are a 4-byte little-endian length followed by a JSON
//! document tagged with an `op` field:
//!
//! | op            | direction        | fields                 |
//! |---------------|------------------|------------------------|
//! | `subscribe`   | client → broker  | `subject`              |
//! | `unsubscribe` | client → broker  | `subject`              |
//! | `publish`     | client → broker  | `subject`, `payload`   |
//! | `deliver`     | broker → client  | `subject`, `payload`   |
//!
//! Payloads are base64 text. The broker routes each `publish` to every
//! connection subscribed to the exact subject, including the publisher's own.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::codec::base64_bytes;
use crate::event::error::{EventSystemError, Result};
use crate::event::transport::{Frame, Transport};
use crate::kernel::constants::{DEFAULT_MAX_RECONNECTS, DEFAULT_RECONNECT_WAIT, MAX_FRAME_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireMessage {
    Subscribe {
        subject: String,
    },
    Unsubscribe {
        subject: String,
    },
    Publish {
        subject: String,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    Deliver {
        subject: String,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &WireMessage) -> std::io::Result<()> {
    let body = serde_json::to_vec(message).map_err(std::io::Error::other)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame exceeds maximum length"))?;
    writer.write_u32_le(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one frame. `Ok(None)` on a clean end of stream.
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<WireMessage>> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds maximum length", len),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

//--------------------------------------------------
// TcpTransport (client side)
//--------------------------------------------------

/// Reconnect policy for a [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpTransportOptions {
    /// Attempts made after an established connection drops.
    pub max_reconnects: u32,
    /// Pause before each reconnect attempt.
    pub reconnect_wait: Duration,
    /// Bound on a single dial.
    pub connect_timeout: Duration,
}

impl Default for TcpTransportOptions {
    fn default() -> Self {
        Self {
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    connected: AtomicBool,
    subjects: StdMutex<HashSet<String>>,
}

impl ConnectionState {
    fn subjects(&self) -> Vec<String> {
        let subjects = self.subjects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        subjects.iter().cloned().collect()
    }
}

/// Client connection to a [`TcpBroker`].
///
/// One supervisor task owns the socket. When the connection drops it retries
/// up to `max_reconnects` times and re-announces every subject this transport
/// is subscribed to.
pub struct TcpTransport {
    endpoint: String,
    options: TcpTransportOptions,
    state: Arc<ConnectionState>,
    outgoing: StdMutex<Option<mpsc::UnboundedSender<WireMessage>>>,
    shutdown: CancellationToken,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    pub fn new(endpoint: impl Into<String>, options: TcpTransportOptions) -> Self {
        Self {
            endpoint: endpoint.into(),
            options,
            state: Arc::new(ConnectionState::default()),
            outgoing: StdMutex::new(None),
            shutdown: CancellationToken::new(),
            supervisor: StdMutex::new(None),
        }
    }

    fn send(&self, message: WireMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(EventSystemError::unavailable(&self.endpoint, "transport is not connected"));
        }
        let outgoing = self.outgoing.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match outgoing.as_ref() {
            Some(tx) if tx.send(message).is_ok() => Ok(()),
            _ => Err(EventSystemError::unavailable(&self.endpoint, "transport is closed")),
        }
    }
}

async fn dial(endpoint: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")),
    }
}

async fn redial(endpoint: &str, options: &TcpTransportOptions, shutdown: &CancellationToken) -> Option<TcpStream> {
    for attempt in 1..=options.max_reconnects {
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(options.reconnect_wait) => {}
        }
        match dial(endpoint, options.connect_timeout).await {
            Ok(stream) => {
                log::info!("Reconnected to broker {} (attempt {})", endpoint, attempt);
                return Some(stream);
            }
            Err(e) => log::warn!(
                "Reconnect attempt {}/{} to {} failed: {}",
                attempt,
                options.max_reconnects,
                endpoint,
                e
            ),
        }
    }
    None
}

async fn read_deliveries(mut reader: tokio::net::tcp::OwnedReadHalf, inbound: mpsc::UnboundedSender<Frame>) {
    loop {
        match read_message(&mut reader).await {
            Ok(Some(WireMessage::Deliver { subject, payload })) => {
                if inbound.send(Frame::new(subject, payload)).is_err() {
                    return;
                }
            }
            Ok(Some(other)) => log::debug!("Ignoring unexpected message from broker: {:?}", other),
            Ok(None) => return,
            Err(e) => {
                log::warn!("Broker connection read failed: {}", e);
                return;
            }
        }
    }
}

async fn supervise(
    endpoint: String,
    options: TcpTransportOptions,
    first: TcpStream,
    inbound: mpsc::UnboundedSender<Frame>,
    mut outgoing: mpsc::UnboundedReceiver<WireMessage>,
    state: Arc<ConnectionState>,
    shutdown: CancellationToken,
) {
    let mut next = Some(first);
    let mut pending: Option<WireMessage> = None;

    loop {
        let stream = match next.take() {
            Some(stream) => stream,
            None => match redial(&endpoint, &options, &shutdown).await {
                Some(stream) => stream,
                None => {
                    if !shutdown.is_cancelled() {
                        log::error!("Giving up on broker {} after {} attempts", endpoint, options.max_reconnects);
                    }
                    return;
                }
            },
        };

        let (reader, mut writer) = stream.into_split();
        let mut resubscribed = true;
        for subject in state.subjects() {
            if write_message(&mut writer, &WireMessage::Subscribe { subject }).await.is_err() {
                resubscribed = false;
                break;
            }
        }
        if let Some(message) = pending.take() {
            if write_message(&mut writer, &message).await.is_err() {
                pending = Some(message);
                resubscribed = false;
            }
        }
        if !resubscribed {
            continue;
        }

        state.connected.store(true, Ordering::Release);
        let mut reader_task = tokio::spawn(read_deliveries(reader, inbound.clone()));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    reader_task.abort();
                    state.connected.store(false, Ordering::Release);
                    return;
                }
                message = outgoing.recv() => {
                    let Some(message) = message else {
                        reader_task.abort();
                        state.connected.store(false, Ordering::Release);
                        return;
                    };
                    if let Err(e) = write_message(&mut writer, &message).await {
                        log::warn!("Write to broker {} failed: {}", endpoint, e);
                        pending = Some(message);
                        reader_task.abort();
                        break;
                    }
                }
                _ = &mut reader_task => break,
            }
        }

        state.connected.store(false, Ordering::Release);
        log::warn!("Disconnected from broker {}", endpoint);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    async fn connect(&self, inbound: mpsc::UnboundedSender<Frame>) -> Result<()> {
        let stream = dial(&self.endpoint, self.options.connect_timeout)
            .await
            .map_err(|e| EventSystemError::unavailable(&self.endpoint, e.to_string()))?;
        // Mark connected before the supervisor runs so callers can subscribe
        // immediately; messages queue on the outgoing channel meanwhile.
        self.state.connected.store(true, Ordering::Release);

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outgoing.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);

        let task = tokio::spawn(supervise(
            self.endpoint.clone(),
            self.options.clone(),
            stream,
            inbound,
            rx,
            Arc::clone(&self.state),
            self.shutdown.clone(),
        ));
        *self.supervisor.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
        log::info!("Connected to broker {}", self.endpoint);
        Ok(())
    }

    async fn publish(&self, frame: Frame) -> Result<()> {
        self.send(WireMessage::Publish {
            subject: frame.subject,
            payload: frame.payload,
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<()> {
        self.send(WireMessage::Subscribe {
            subject: subject.to_string(),
        })?;
        self.state
            .subjects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(subject.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, subject: &str) -> Result<()> {
        self.state
            .subjects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(subject);
        self.send(WireMessage::Unsubscribe {
            subject: subject.to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.state.connected.store(false, Ordering::Release);
        self.outgoing.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let task = self.supervisor.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        log::info!("Closed connection to broker {}", self.endpoint);
        Ok(())
    }
}

//--------------------------------------------------
// TcpBroker (server side)
//--------------------------------------------------

type Routes = HashMap<String, HashMap<u64, mpsc::UnboundedSender<WireMessage>>>;

#[derive(Default)]
struct BrokerState {
    routes: StdMutex<Routes>,
    next_connection: AtomicU64,
}

impl BrokerState {
    fn routes(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, subject: &str, payload: Vec<u8>) -> usize {
        let routes = self.routes();
        let Some(connections) = routes.get(subject) else {
            return 0;
        };
        connections
            .values()
            .filter(|tx| {
                tx.send(WireMessage::Deliver {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
            })
            .count()
    }

    fn drop_connection(&self, connection: u64) {
        let mut routes = self.routes();
        routes.retain(|_, connections| {
            connections.remove(&connection);
            !connections.is_empty()
        });
    }
}

/// Minimal subject-routing broker for the [`TcpTransport`] protocol.
pub struct TcpBroker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

impl fmt::Debug for TcpBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpBroker")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl TcpBroker {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| EventSystemError::transport(format!("bind {}", addr), e))?;
        Ok(Self {
            listener,
            state: Arc::new(BrokerState::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| EventSystemError::transport("local_addr", e))
    }

    /// Accept and serve connections until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        log::info!("Broker listening on {:?}", self.listener.local_addr().ok());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| EventSystemError::transport("accept", e))?;
                    let id = self.state.next_connection.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Broker accepted connection {} from {}", id, peer);
                    tokio::spawn(serve_connection(id, stream, Arc::clone(&self.state), shutdown.child_token()));
                }
            }
        }
        log::info!("Broker stopped");
        Ok(())
    }
}

async fn serve_connection(id: u64, stream: TcpStream, state: Arc<BrokerState>, shutdown: CancellationToken) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &message).await {
                log::debug!("Broker write to connection {} failed: {}", id, e);
                break;
            }
        }
    });

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = read_message(&mut reader) => message,
        };
        match message {
            Ok(Some(WireMessage::Subscribe { subject })) => {
                state.routes().entry(subject).or_default().insert(id, tx.clone());
            }
            Ok(Some(WireMessage::Unsubscribe { subject })) => {
                let mut routes = state.routes();
                if let Some(connections) = routes.get_mut(&subject) {
                    connections.remove(&id);
                    if connections.is_empty() {
                        routes.remove(&subject);
                    }
                }
            }
            Ok(Some(WireMessage::Publish { subject, payload })) => {
                let routed = state.route(&subject, payload);
                log::trace!("Broker routed '{}' to {} connection(s)", subject, routed);
            }
            Ok(Some(WireMessage::Deliver { .. })) => {
                log::debug!("Connection {} sent a deliver frame; ignoring", id);
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("Broker read from connection {} failed: {}", id, e);
                break;
            }
        }
    }

    state.drop_connection(id);
    drop(tx);
    writer_task.abort();
    log::debug!("Broker connection {} closed", id);
}
