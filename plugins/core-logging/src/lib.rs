//! # core-logging
//!
//! Installs the process-wide tracing backend and provides [`LoggingPlugin`],
//! which turns the kernel's lifecycle events into structured log lines.
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use plexus_core::event::types::kernel;
use plexus_core::event::{Event, KernelEvent, handler_fn};
use plexus_core::{Context, HealthReport, KernelHandle, Plugin, PluginResult};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

pub const PLUGIN_NAME: &str = "core-logging";

/// Lifecycle events kept for inspection.
const RECENT_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log level '{level}'")]
    InvalidLevel { level: String },

    #[error("failed to install logging backend: {0}")]
    Install(String),
}

static INSTALL: Once = Once::new();

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `level`, and route `log` records through it.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    let default_level = LevelFilter::from_str(level).map_err(|_| LoggingError::InvalidLevel {
        level: level.to_string(),
    })?;

    let mut outcome = Ok(());
    INSTALL.call_once(|| outcome = install(default_level));
    outcome
}

fn install(default_level: LevelFilter) -> Result<(), LoggingError> {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_log::LogTracer::init().map_err(|e| LoggingError::Install(e.to_string()))?;
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(false));
    tracing::subscriber::set_global_default(subscriber).map_err(|e| LoggingError::Install(e.to_string()))?;

    log::debug!("Logging backend installed at default level {}", default_level);
    Ok(())
}

#[derive(Debug, Default)]
struct Journal {
    seen: AtomicU64,
    recent: Mutex<VecDeque<KernelEvent>>,
}

impl Journal {
    fn record(&self, event: KernelEvent) {
        self.seen.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(event);
    }
}

/// Logs every kernel lifecycle event published on the bus.
///
/// Subscriptions are taken in `init`, so the plugin sees the lifecycle of
/// every plugin registered after it as well as its own.
#[derive(Debug, Default)]
pub struct LoggingPlugin {
    journal: Arc<Journal>,
}

impl LoggingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lifecycle events observed so far.
    pub fn events_seen(&self) -> u64 {
        self.journal.seen.load(Ordering::Relaxed)
    }

    /// The most recent lifecycle events, oldest first.
    pub fn recent(&self) -> Vec<KernelEvent> {
        self.journal
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

fn log_lifecycle(event: &KernelEvent) {
    match event {
        KernelEvent::Started { plugins } => {
            tracing::info!(target: "plexus::lifecycle", plugins = plugins.len(), "kernel started");
        }
        KernelEvent::Stopping { plugins } => {
            tracing::info!(target: "plexus::lifecycle", plugins = plugins.len(), "kernel stopping");
        }
        KernelEvent::PluginStarted { plugin, version } => {
            tracing::info!(target: "plexus::lifecycle", %plugin, %version, "plugin started");
        }
        KernelEvent::PluginStopped { plugin } => {
            tracing::info!(target: "plexus::lifecycle", %plugin, "plugin stopped");
        }
        KernelEvent::PluginFailed { plugin, phase, error } => {
            tracing::error!(target: "plexus::lifecycle", %plugin, %phase, %error, "plugin failed");
        }
    }
}

#[async_trait]
impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn init(&self, _ctx: &Context, kernel: KernelHandle) -> PluginResult<()> {
        log::info!("Initializing Core Logging Plugin v{}", self.version());
        for topic in kernel::ALL {
            let journal = Arc::clone(&self.journal);
            kernel
                .subscribe_event(
                    topic,
                    handler_fn(move |event: Arc<Event>| {
                        let journal = Arc::clone(&journal);
                        async move {
                            match KernelEvent::from_event(&event) {
                                Some(lifecycle) => {
                                    log_lifecycle(&lifecycle);
                                    journal.record(lifecycle);
                                }
                                None => log::warn!(
                                    "Undecodable lifecycle event on '{}' from '{}'",
                                    event.topic(),
                                    event.producer()
                                ),
                            }
                        }
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn start(&self, _ctx: &Context) -> PluginResult<()> {
        Ok(())
    }

    async fn stop(&self, _ctx: &Context) -> PluginResult<()> {
        log::info!("Shutting down Core Logging Plugin");
        Ok(())
    }

    async fn health(&self, _ctx: &Context) -> HealthReport {
        HealthReport::healthy()
    }
}
