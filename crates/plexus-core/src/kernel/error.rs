//! # Plexus Kernel Errors
//!
//! [`Error`] is the taxonomy the microkernel reports to its host. Startup
//! failures carry the failing plugin's name and the plugin's own
//! [`PluginError`]; shutdown failures are collected into one aggregate
//! [`Error::StopFailed`] so that every plugin's stop is still attempted.
use std::fmt;
use std::result::Result as StdResult;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::event::error::EventSystemError;
use crate::kernel::context::ContextError;
use crate::plugin_system::error::PluginError;

/// One plugin that did not stop cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopFailure {
    pub plugin: String,
    pub cause: String,
}

impl fmt::Display for StopFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.plugin, self.cause)
    }
}

fn list_failures(failures: &[StopFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Plugin '{name}' is already registered")]
    DuplicatePlugin { name: String },

    #[error("Invalid plugin name '{name}': {reason}")]
    InvalidPluginName { name: String, reason: String },

    /// Operation attempted in the wrong kernel or plugin state.
    #[error("Cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    #[error("Plugin '{plugin}' failed to initialize: {source}")]
    InitFailed {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("Plugin '{plugin}' failed to start: {source}")]
    StartFailed {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("{} plugin(s) failed to stop cleanly: {}", .failures.len(), list_failures(.failures))]
    StopFailed { failures: Vec<StopFailure> },

    #[error("Health probe for plugin '{plugin}' timed out after {timeout:?}")]
    HealthTimeout { plugin: String, timeout: Duration },

    #[error("Plugin '{name}' is not registered")]
    PluginNotFound { name: String },

    #[error("Event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lifecycle context error: {0}")]
    Context(#[from] ContextError),
}

impl Error {
    /// Name of the plugin the error is about, when there is exactly one.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Error::DuplicatePlugin { name } | Error::PluginNotFound { name } => Some(name),
            Error::InitFailed { plugin, .. }
            | Error::StartFailed { plugin, .. }
            | Error::HealthTimeout { plugin, .. } => Some(plugin),
            _ => None,
        }
    }
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;
