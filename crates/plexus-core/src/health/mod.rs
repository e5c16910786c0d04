//! # Plexus Health
//!
//! Per-plugin [`HealthReport`]s and the [`CompositeReport`] the kernel hands
//! to an external monitoring layer. Rendered as JSON, a composite report has
//! the shape `{"status": ..., "plugins": {"<name>": {"status": ..., "detail": ...}}}`.
pub mod aggregator;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use aggregator::HealthAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// The probe did not answer before the deadline.
    Timeout,
}

impl HealthStatus {
    /// Severity used when folding statuses into a composite.
    fn severity(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded | HealthStatus::Timeout => 1,
            HealthStatus::Unhealthy => 2,
        }
    }

    /// Fold per-plugin statuses: `unhealthy` if any is, else `degraded` if any
    /// is degraded or timed out, else `healthy`.
    pub fn combine<I>(statuses: I) -> HealthStatus
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        match statuses.into_iter().map(HealthStatus::severity).max() {
            Some(2) => HealthStatus::Unhealthy,
            Some(1) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Timeout => "timeout",
        };
        f.write_str(label)
    }
}

/// One plugin's answer to a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self::with_detail(HealthStatus::Degraded, detail)
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self::with_detail(HealthStatus::Unhealthy, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::with_detail(HealthStatus::Timeout, detail)
    }

    pub fn with_detail(status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

/// Health of the whole kernel, keyed by plugin name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeReport {
    pub status: HealthStatus,
    pub plugins: BTreeMap<String, HealthReport>,
}

impl CompositeReport {
    pub fn from_reports(plugins: BTreeMap<String, HealthReport>) -> Self {
        let status = HealthStatus::combine(plugins.values().map(|report| report.status));
        Self { status, plugins }
    }

    /// Report for a kernel that is not running: unhealthy, no plugins.
    pub fn not_running() -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            plugins: BTreeMap::new(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn get(&self, plugin: &str) -> Option<&HealthReport> {
        self.plugins.get(plugin)
    }
}

// Test module declaration
#[cfg(test)]
mod tests;
