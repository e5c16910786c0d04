//! # Plexus Kernel Configuration
//!
//! [`KernelConfig`] carries the deployment decisions the kernel needs: which
//! bus to build, where the broker lives, and the lifecycle deadlines. It is
//! read from JSON (always), TOML (`toml-config` feature) or YAML
//! (`yaml-config` feature), then optionally overridden from the environment.
//!
//! Every field has a default, so an empty document is a valid in-process
//! configuration.
pub mod error;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::BusMode;
use crate::kernel::constants::{
    APP_NAME, DEFAULT_HANDLER_TIMEOUT, DEFAULT_HEALTH_TIMEOUT, DEFAULT_MAX_RECONNECTS,
    DEFAULT_RECONNECT_WAIT, DEFAULT_STOP_TIMEOUT, DEFAULT_SUBJECT_PREFIX, ENV_BROKER_ENDPOINT,
    ENV_BUS_MODE, ENV_SERVICE_NAME,
};

pub use error::{ConfigError, Result};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Bus selection and networked transport tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub mode: BusMode,
    /// `host:port` of the broker; required in networked mode.
    pub broker_endpoint: Option<String>,
    pub subject_prefix: String,
    pub handler_timeout_ms: u64,
    pub max_reconnects: u32,
    pub reconnect_wait_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: BusMode::InProcess,
            broker_endpoint: None,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            handler_timeout_ms: DEFAULT_HANDLER_TIMEOUT.as_millis() as u64,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_wait_ms: DEFAULT_RECONNECT_WAIT.as_millis() as u64,
        }
    }
}

impl BusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Deadline for a full shutdown, also used for rollback after a failed start.
    pub stop_timeout_ms: u64,
    /// Shared deadline for one health check.
    pub health_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
            health_timeout_ms: DEFAULT_HEALTH_TIMEOUT.as_millis() as u64,
        }
    }
}

impl LifecycleConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Plugins the host should register. Empty means all bundled plugins.
    pub enabled: Vec<String>,
}

impl PluginsConfig {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.is_empty() || self.enabled.iter().any(|enabled| enabled == name)
    }
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Identity stamped as producer on events published by the host itself.
    pub service_name: String,
    pub bus: BusConfig,
    pub lifecycle: LifecycleConfig,
    pub plugins: PluginsConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            service_name: APP_NAME.to_string(),
            bus: BusConfig::default(),
            lifecycle: LifecycleConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

impl KernelConfig {
    /// Parse a configuration document. The result is not yet validated.
    pub fn parse_as(data: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| ConfigError::parse("JSON", e)),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => {
                // An empty YAML document deserializes to unit, not to an empty map.
                if data.trim().is_empty() {
                    return Ok(Self::default());
                }
                serde_yaml::from_str(data).map_err(|e| ConfigError::parse("YAML", e))
            }
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| ConfigError::parse("TOML", e)),
        }
    }

    /// Read, parse and validate a configuration file, picking the format from
    /// its extension.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse_as(&data, format)?;
        config.validate()?;
        log::debug!("Loaded {} configuration from {}", format, path.display());
        Ok(config)
    }

    /// Render the configuration in `format`.
    pub fn render(&self, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| ConfigError::parse("JSON", e)),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| ConfigError::parse("YAML", e)),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| ConfigError::parse("TOML", e)),
        }
    }

    /// Apply `PLEXUS_BUS_MODE`, `PLEXUS_BROKER_ENDPOINT` and
    /// `PLEXUS_SERVICE_NAME` as returned by `lookup`.
    ///
    /// Hosts pass `|key| std::env::var(key).ok()`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_BUS_MODE) {
            self.bus.mode = mode
                .parse()
                .map_err(|reason: String| ConfigError::invalid(ENV_BUS_MODE, reason))?;
        }
        if let Some(endpoint) = lookup(ENV_BROKER_ENDPOINT) {
            self.bus.broker_endpoint = Some(endpoint);
        }
        if let Some(name) = lookup(ENV_SERVICE_NAME) {
            self.service_name = name;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::invalid("service_name", "must not be empty"));
        }
        if self.bus.mode == BusMode::Networked {
            match self.bus.broker_endpoint.as_deref().map(str::trim) {
                None | Some("") => {
                    return Err(ConfigError::invalid(
                        "bus.broker_endpoint",
                        "required when bus.mode is networked",
                    ));
                }
                Some(_) => {}
            }
        }
        if self.bus.subject_prefix.is_empty() || self.bus.subject_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "bus.subject_prefix",
                "must be non-empty and contain no whitespace",
            ));
        }
        if self.bus.handler_timeout_ms == 0 {
            return Err(ConfigError::invalid("bus.handler_timeout_ms", "must be greater than zero"));
        }
        if self.lifecycle.stop_timeout_ms == 0 {
            return Err(ConfigError::invalid("lifecycle.stop_timeout_ms", "must be greater than zero"));
        }
        if self.lifecycle.health_timeout_ms == 0 {
            return Err(ConfigError::invalid("lifecycle.health_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

// Test module declaration
#[cfg(test)]
mod tests;
