//! # plexus-core
//!
//! Plugin microkernel with a deployment-agnostic event bus. The same plugins
//! run co-located in one process over the [`InProcessBus`] or as separate
//! services over the broker-backed [`NetworkedBus`]; only the bus the host
//! hands to the [`Microkernel`] changes.
pub mod config;
pub mod event;
pub mod health;
pub mod kernel;
pub mod plugin_system;

// Re-export key public types/traits for the binary and plugins
pub use config::{ConfigFormat, KernelConfig};
pub use event::{BusMode, Event, EventBus, EventHandler, InProcessBus, NetworkedBus, SubscriptionHandle};
pub use health::{CompositeReport, HealthReport, HealthStatus};
pub use kernel::error::Error as KernelError;
pub use kernel::{Context, KernelHandle, KernelState, Microkernel};
pub use plugin_system::{Plugin, PluginDescriptor, PluginError, PluginResult, PluginState};

#[cfg(test)]
mod tests;
