use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, RwLock, RwLockReadGuard};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::KernelConfig;
use crate::event::types::KernelEvent;
use crate::event::{
    BusMode, EventBus, InProcessBus, NetworkedBus, NetworkedBusOptions, TcpTransport, TcpTransportOptions,
};
use crate::health::{CompositeReport, HealthAggregator, HealthReport};
use crate::kernel::constants::{APP_NAME, APP_VERSION, KERNEL_PRODUCER};
use crate::kernel::context::Context;
use crate::kernel::error::{Error, Result, StopFailure};
use crate::kernel::handle::{KernelHandle, SharedDescriptors, SubscriptionLedger};
use crate::plugin_system::{Plugin, PluginDescriptor, PluginError, PluginRegistry, PluginState};

/// Whole-kernel lifecycle: `Created → Starting → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            KernelState::Created => "created",
            KernelState::Starting => "starting",
            KernelState::Running => "running",
            KernelState::Stopping => "stopping",
            KernelState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

type StopOutcome = std::result::Result<(), Vec<StopFailure>>;

fn outcome_to_result(outcome: &StopOutcome) -> Result<()> {
    outcome.clone().map_err(|failures| Error::StopFailed { failures })
}

/// The lifecycle manager.
///
/// Owns the plugin registry and the event bus, drives every plugin through
/// `init → start` in registration order, and stops the ones that started in
/// exactly the reverse order. Start and stop are serialized against each
/// other; health checks run alongside either.
pub struct Microkernel {
    config: KernelConfig,
    bus: Arc<dyn EventBus>,
    registry: RwLock<PluginRegistry>,
    state: StdMutex<KernelState>,
    // Plugins whose `start` succeeded, in start order.
    started: StdMutex<Vec<Arc<dyn Plugin>>>,
    // Held for the duration of start/stop; caches the shutdown outcome.
    transition: Mutex<Option<StopOutcome>>,
    descriptors: SharedDescriptors,
    ledger: Arc<SubscriptionLedger>,
    health: HealthAggregator,
}

impl fmt::Debug for Microkernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Microkernel")
            .field("state", &self.state())
            .field("bus", &self.bus)
            .field("plugins", &self.plugin_names())
            .finish_non_exhaustive()
    }
}

impl Microkernel {
    /// Build a kernel around an existing bus.
    pub fn with_bus(config: KernelConfig, bus: Arc<dyn EventBus>) -> Self {
        log::info!("Creating {} v{} kernel with {} bus", APP_NAME, APP_VERSION, bus.mode());
        let health = HealthAggregator::new(config.lifecycle.health_timeout());
        Self {
            config,
            bus,
            registry: RwLock::new(PluginRegistry::new()),
            state: StdMutex::new(KernelState::Created),
            started: StdMutex::new(Vec::new()),
            transition: Mutex::new(None),
            descriptors: SharedDescriptors::default(),
            ledger: Arc::new(SubscriptionLedger::default()),
            health,
        }
    }

    /// Default configuration with an in-process bus.
    pub fn in_process() -> Self {
        let config = KernelConfig::default();
        let bus = Arc::new(InProcessBus::with_handler_timeout(config.bus.handler_timeout()));
        Self::with_bus(config, bus)
    }

    /// Validate `config` and build the bus its `bus.mode` selects.
    ///
    /// In networked mode this connects to the broker and fails with
    /// `BusUnavailable` if it cannot be reached.
    pub async fn from_config(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let bus: Arc<dyn EventBus> = match config.bus.mode {
            BusMode::InProcess => Arc::new(InProcessBus::with_handler_timeout(config.bus.handler_timeout())),
            BusMode::Networked => {
                // validate() guarantees the endpoint is present.
                let endpoint = config.bus.broker_endpoint.clone().unwrap_or_default();
                let transport = TcpTransport::new(
                    endpoint,
                    TcpTransportOptions {
                        max_reconnects: config.bus.max_reconnects,
                        reconnect_wait: config.bus.reconnect_wait(),
                        ..TcpTransportOptions::default()
                    },
                );
                let options = NetworkedBusOptions {
                    subject_prefix: config.bus.subject_prefix.clone(),
                    handler_timeout: config.bus.handler_timeout(),
                };
                Arc::new(NetworkedBus::connect(Arc::new(transport), options).await?)
            }
        };
        Ok(Self::with_bus(config, bus))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn state(&self) -> KernelState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: KernelState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log::info!("Kernel state: {} -> {}", *state, next);
        *state = next;
    }

    fn registry(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.registry().state(name)
    }

    /// Registered plugin names in registration order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.registry().names()
    }

    /// Names of running plugins in start order.
    pub fn started_plugins(&self) -> Vec<String> {
        self.started_snapshot()
            .iter()
            .map(|plugin| plugin.name().to_string())
            .collect()
    }

    /// Descriptors of plugins that completed `init`, in init order.
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn started_snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.started.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Add a plugin to the end of the startup order.
    ///
    /// Fails with `DuplicatePlugin` for a name already taken and with
    /// `InvalidState` once the kernel has been started.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let state = self.state();
        if state != KernelState::Created {
            return Err(Error::InvalidState {
                operation: format!("register plugin '{}'", plugin.name()),
                state: format!("kernel is {}", state),
            });
        }
        self.registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(plugin)
    }

    async fn announce(&self, ctx: &Context, event: KernelEvent) {
        let topic = event.topic();
        let event = match event.into_event(KERNEL_PRODUCER) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Failed to encode kernel event '{}': {}", topic, e);
                return;
            }
        };
        match ctx.run(self.bus.publish(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Failed to publish kernel event '{}': {}", topic, e),
            Err(reason) => log::warn!("Kernel event '{}' abandoned: {}", topic, reason),
        }
    }

    fn transition_plugin(&self, name: &str, next: PluginState) {
        if let Err(e) = self.registry().transition(name, next) {
            log::error!("{}", e);
        }
    }

    async fn mark_failed(&self, ctx: &Context, name: &str, phase: &str, error: &dyn fmt::Display) {
        self.transition_plugin(name, PluginState::Failed);
        self.ledger.revoke_all(name);
        self.announce(
            ctx,
            KernelEvent::PluginFailed {
                plugin: name.to_string(),
                phase: phase.to_string(),
                error: error.to_string(),
            },
        )
        .await;
    }

    /// Initialize and start every registered plugin in registration order.
    ///
    /// The first `init` or `start` failure stops every plugin started so far
    /// in reverse order (under a fresh context bounded by the configured stop
    /// timeout), leaves the kernel `Stopped`, and returns `InitFailed` or
    /// `StartFailed` naming the plugin.
    pub async fn start(&self, ctx: &Context) -> Result<()> {
        let mut transition = self.transition.lock().await;
        let state = self.state();
        if state != KernelState::Created {
            return Err(Error::InvalidState {
                operation: "start kernel".to_string(),
                state: format!("kernel is {}", state),
            });
        }

        self.set_state(KernelState::Starting);
        let plugins = {
            let mut registry = self.registry.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            registry.freeze();
            registry.all()
        };
        log::info!("Starting {} plugin(s)", plugins.len());

        for plugin in plugins {
            let name = plugin.name().to_string();
            let handle = KernelHandle::new(
                name.as_str(),
                Arc::clone(&self.bus),
                Arc::clone(&self.descriptors),
                Arc::clone(&self.ledger),
            );

            log::info!("Initializing plugin '{}'", name);
            let init = ctx
                .run(plugin.init(ctx, handle))
                .await
                .unwrap_or_else(|reason| Err(PluginError::from(reason)));
            if let Err(source) = init {
                log::error!("Plugin '{}' failed to initialize: {}", name, source);
                self.mark_failed(ctx, &name, "init", &source).await;
                *transition = Some(self.rollback().await);
                return Err(Error::InitFailed { plugin: name, source });
            }
            self.transition_plugin(&name, PluginState::Initialized);
            self.descriptors
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(PluginDescriptor::of(plugin.as_ref()));

            log::info!("Starting plugin '{}'", name);
            let start = ctx
                .run(plugin.start(ctx))
                .await
                .unwrap_or_else(|reason| Err(PluginError::from(reason)));
            if let Err(source) = start {
                log::error!("Plugin '{}' failed to start: {}", name, source);
                self.mark_failed(ctx, &name, "start", &source).await;
                *transition = Some(self.rollback().await);
                return Err(Error::StartFailed { plugin: name, source });
            }
            self.transition_plugin(&name, PluginState::Started);
            self.started
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(Arc::clone(&plugin));
            self.announce(
                ctx,
                KernelEvent::PluginStarted {
                    plugin: name,
                    version: plugin.version().to_string(),
                },
            )
            .await;
        }

        self.set_state(KernelState::Running);
        self.announce(
            ctx,
            KernelEvent::Started {
                plugins: self.started_plugins(),
            },
        )
        .await;
        Ok(())
    }

    /// Undo a partial startup. The caller holds the transition lock.
    async fn rollback(&self) -> StopOutcome {
        let started = self.started_plugins();
        log::warn!("Rolling back startup; stopping {} started plugin(s)", started.len());
        let ctx = Context::background().with_timeout(self.config.lifecycle.stop_timeout());
        let failures = self.stop_started(&ctx).await;
        self.close_bus().await;
        self.set_state(KernelState::Stopped);
        for failure in &failures {
            log::error!("Rollback could not stop {}", failure);
        }
        if failures.is_empty() { Ok(()) } else { Err(failures) }
    }

    /// Stop every started plugin in reverse start order, attempting each
    /// exactly once and collecting failures.
    async fn stop_started(&self, ctx: &Context) -> Vec<StopFailure> {
        let plugins = std::mem::take(&mut *self.started.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        let mut failures = Vec::new();

        for plugin in plugins.iter().rev() {
            let name = plugin.name().to_string();
            log::info!("Stopping plugin '{}'", name);
            let outcome = ctx
                .run(plugin.stop(ctx))
                .await
                .unwrap_or_else(|reason| Err(PluginError::from(reason)));
            match outcome {
                Ok(()) => {
                    self.transition_plugin(&name, PluginState::Stopped);
                    self.ledger.revoke_all(&name);
                    self.announce(ctx, KernelEvent::PluginStopped { plugin: name }).await;
                }
                Err(cause) => {
                    log::error!("Plugin '{}' failed to stop: {}", name, cause);
                    failures.push(StopFailure {
                        plugin: name.clone(),
                        cause: cause.to_string(),
                    });
                    self.mark_failed(ctx, &name, "stop", &cause).await;
                }
            }
        }
        failures
    }

    async fn close_bus(&self) {
        if let Err(e) = self.bus.close().await {
            log::warn!("Failed to close {} event bus: {}", self.bus.mode(), e);
        }
    }

    /// Stop every started plugin in reverse start order, then close the bus.
    ///
    /// Every plugin's `stop` is attempted exactly once even if others fail or
    /// `ctx` expires; failures come back together as `StopFailed`. Calling
    /// `stop` again returns the same outcome without touching any plugin.
    /// On a kernel that was never started this simply moves it to `Stopped`.
    pub async fn stop(&self, ctx: &Context) -> Result<()> {
        let mut transition = ctx.run(self.transition.lock()).await?;
        if let Some(outcome) = transition.as_ref() {
            log::debug!("Kernel already stopped; returning cached outcome");
            return outcome_to_result(outcome);
        }

        let state = self.state();
        if state == KernelState::Created {
            self.registry
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .freeze();
            self.close_bus().await;
            self.set_state(KernelState::Stopped);
            *transition = Some(Ok(()));
            return Ok(());
        }

        self.set_state(KernelState::Stopping);
        self.announce(
            ctx,
            KernelEvent::Stopping {
                plugins: self.started_plugins(),
            },
        )
        .await;

        let failures = self.stop_started(ctx).await;
        self.close_bus().await;
        self.set_state(KernelState::Stopped);

        let outcome = if failures.is_empty() {
            log::info!("Kernel stopped cleanly");
            Ok(())
        } else {
            log::error!("Kernel stopped with {} failure(s)", failures.len());
            Err(failures)
        };
        let result = outcome_to_result(&outcome);
        *transition = Some(outcome);
        result
    }

    /// Probe every running plugin concurrently under the health deadline.
    ///
    /// A kernel that is not `Running` reports `unhealthy` with no plugins.
    pub async fn health_check(&self, ctx: &Context) -> CompositeReport {
        if self.state() != KernelState::Running {
            return CompositeReport::not_running();
        }
        self.health.check(ctx, self.started_snapshot()).await
    }

    /// Probe one running plugin; `HealthTimeout` if it misses the deadline.
    pub async fn probe(&self, ctx: &Context, name: &str) -> Result<HealthReport> {
        let plugin = self
            .started_snapshot()
            .into_iter()
            .find(|plugin| plugin.name() == name);
        let Some(plugin) = plugin else {
            return match self.plugin_state(name) {
                None => Err(Error::PluginNotFound { name: name.to_string() }),
                Some(state) => Err(Error::InvalidState {
                    operation: format!("probe plugin '{}'", name),
                    state: format!("plugin is {}", state),
                }),
            };
        };
        self.health.probe_one(ctx, plugin).await.map_err(|reason| {
            log::warn!("Health probe for '{}' did not answer: {}", name, reason);
            Error::HealthTimeout {
                plugin: name.to_string(),
                timeout: self.health.timeout(),
            }
        })
    }

    /// Start, wait for `shutdown` to resolve, then stop under a fresh context
    /// bounded by the configured stop timeout.
    pub async fn run_until<F>(&self, ctx: &Context, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start(ctx).await?;
        log::info!("Kernel running; waiting for shutdown signal");
        shutdown.await;
        log::info!("Shutdown requested");
        let stop_ctx = Context::background().with_timeout(self.config.lifecycle.stop_timeout());
        self.stop(&stop_ctx).await
    }
}
