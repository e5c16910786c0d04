//! # core-heartbeat
//!
//! [`HeartbeatPlugin`] owns one background task that publishes a
//! [`Heartbeat`] on [`topics::HEARTBEAT`] every interval. Its health reflects
//! whether that task is still ticking.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plexus_core::event::types::topics;
use plexus_core::{Context, HealthReport, KernelHandle, Plugin, PluginError, PluginResult};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const PLUGIN_NAME: &str = "core-heartbeat";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Payload of every heartbeat event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub plugin: String,
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Pulse {
    beats: AtomicU64,
    last: Mutex<Option<Instant>>,
}

impl Pulse {
    fn beat(&self) {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
        self.beats.fetch_add(1, Ordering::Relaxed);
    }

    fn since_last(&self) -> Option<Duration> {
        self.last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map(|last| last.elapsed())
    }
}

struct Ticker {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HeartbeatPlugin {
    interval: Duration,
    kernel: Mutex<Option<KernelHandle>>,
    ticker: Mutex<Option<Ticker>>,
    pulse: Arc<Pulse>,
}

impl HeartbeatPlugin {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            kernel: Mutex::new(None),
            ticker: Mutex::new(None),
            pulse: Arc::new(Pulse::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Heartbeats published since start.
    pub fn beats(&self) -> u64 {
        self.pulse.beats.load(Ordering::Relaxed)
    }

    /// Beyond this gap since the last beat the plugin reports `degraded`.
    pub fn stale_after(&self) -> Duration {
        self.interval * 3
    }

    fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

impl Default for HeartbeatPlugin {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl std::fmt::Debug for HeartbeatPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatPlugin")
            .field("interval", &self.interval)
            .field("beats", &self.beats())
            .finish_non_exhaustive()
    }
}

/// Grade the gap since the last beat against the staleness bound.
pub(crate) fn assess(running: bool, beats: u64, since_last: Option<Duration>, stale_after: Duration) -> HealthReport {
    if !running {
        return HealthReport::unhealthy("heartbeat task is not running");
    }
    if beats == 0 {
        return HealthReport::degraded("no heartbeat published yet");
    }
    match since_last {
        Some(gap) if gap > stale_after => {
            HealthReport::degraded(format!("last heartbeat {}ms ago", gap.as_millis()))
        }
        _ => HealthReport::with_detail(
            plexus_core::HealthStatus::Healthy,
            format!("{} heartbeat(s) published", beats),
        ),
    }
}

async fn publish_beat(kernel: &KernelHandle, pulse: &Pulse) {
    let sequence = pulse.beats.load(Ordering::Relaxed) + 1;
    let heartbeat = Heartbeat {
        plugin: kernel.plugin_name().to_string(),
        sequence,
        sent_at: Utc::now(),
    };
    match kernel.publish_json(topics::HEARTBEAT, &heartbeat).await {
        Ok(()) => pulse.beat(),
        Err(e) => log::warn!("Heartbeat {} not published: {}", sequence, e),
    }
}

async fn run_ticker(kernel: KernelHandle, interval: Duration, pulse: Arc<Pulse>, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => publish_beat(&kernel, &pulse).await,
        }
    }
    log::debug!("Heartbeat task finished after {} beat(s)", pulse.beats.load(Ordering::Relaxed));
}

#[async_trait]
impl Plugin for HeartbeatPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn metadata(&self) -> std::collections::BTreeMap<String, String> {
        [
            ("topic".to_string(), topics::HEARTBEAT.to_string()),
            ("interval_ms".to_string(), self.interval.as_millis().to_string()),
        ]
        .into()
    }

    async fn init(&self, _ctx: &Context, kernel: KernelHandle) -> PluginResult<()> {
        if self.interval.is_zero() {
            return Err(PluginError::Init("heartbeat interval must be greater than zero".into()));
        }
        *self.kernel.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(kernel);
        Ok(())
    }

    async fn start(&self, _ctx: &Context) -> PluginResult<()> {
        let kernel = self
            .kernel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| PluginError::Start("start called before init".into()))?;

        if self.is_running() {
            return Err(PluginError::Start("heartbeat task already running".into()));
        }
        // The first beat goes out before start returns.
        publish_beat(&kernel, &self.pulse).await;

        let mut ticker = self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if ticker.is_some() {
            return Err(PluginError::Start("heartbeat task already running".into()));
        }
        let token = CancellationToken::new();
        let task = tokio::spawn(run_ticker(kernel, self.interval, Arc::clone(&self.pulse), token.clone()));
        *ticker = Some(Ticker { token, task });
        log::info!("Heartbeat every {:?} on '{}'", self.interval, topics::HEARTBEAT);
        Ok(())
    }

    async fn stop(&self, ctx: &Context) -> PluginResult<()> {
        let ticker = self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let Some(Ticker { token, mut task }) = ticker else {
            return Ok(());
        };
        token.cancel();
        match ctx.run(&mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => Err(PluginError::Stop(format!("heartbeat task failed: {}", join_err))),
            Err(reason) => {
                task.abort();
                Err(reason.into())
            }
        }
    }

    async fn health(&self, _ctx: &Context) -> HealthReport {
        assess(self.is_running(), self.beats(), self.pulse.since_last(), self.stale_after())
    }
}
