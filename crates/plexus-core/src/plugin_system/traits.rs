use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::health::HealthReport;
use crate::kernel::context::Context;
use crate::kernel::handle::KernelHandle;
use crate::plugin_system::error::PluginResult;

/// Lifecycle state of one registered plugin.
///
/// `Registered → Initialized → Started → Stopped`, with `Failed` reachable
/// from the first three. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Registered,
    Initialized,
    Started,
    Stopped,
    Failed,
}

impl PluginState {
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Registered, Initialized)
                | (Initialized, Started)
                | (Started, Stopped)
                | (Registered | Initialized | Started, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PluginState::Stopped | PluginState::Failed)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginState::Registered => "registered",
            PluginState::Initialized => "initialized",
            PluginState::Started => "started",
            PluginState::Stopped => "stopped",
            PluginState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Public, read-only view of a plugin that other plugins may inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    /// Free-form public details such as endpoints or subjects served.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PluginDescriptor {
    pub fn of(plugin: &dyn Plugin) -> Self {
        Self {
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            metadata: plugin.metadata(),
        }
    }
}

/// Core trait that every unit of business logic implements.
///
/// Hooks take `&self`: the kernel shares plugins behind `Arc` so health
/// probes can run concurrently, and implementations keep mutable state
/// behind their own locks.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier, unique within one kernel.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Public details exposed to other plugins through their [`KernelHandle`].
    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Prepare the plugin. Must not hold any resources when it fails; a
    /// failure aborts the whole kernel startup.
    async fn init(&self, ctx: &Context, kernel: KernelHandle) -> PluginResult<()>;

    /// Begin active work and return once ready to serve. Long-running work is
    /// spawned onto tasks the plugin owns.
    async fn start(&self, ctx: &Context) -> PluginResult<()>;

    /// Release everything acquired in `init`/`start`, returning promptly once
    /// `ctx` is done even if cleanup is incomplete.
    async fn stop(&self, ctx: &Context) -> PluginResult<()>;

    /// Cheap, side-effect-free status probe that respects `ctx`.
    async fn health(&self, ctx: &Context) -> HealthReport;
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}
