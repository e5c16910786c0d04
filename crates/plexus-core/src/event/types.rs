use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::event::error::Result;

/// Topics published by the kernel itself.
pub mod kernel {
    pub const STARTED: &str = "kernel.started";
    pub const STOPPING: &str = "kernel.stopping";
    pub const PLUGIN_STARTED: &str = "kernel.plugin.started";
    pub const PLUGIN_STOPPED: &str = "kernel.plugin.stopped";
    pub const PLUGIN_FAILED: &str = "kernel.plugin.failed";

    pub const ALL: [&str; 5] = [STARTED, STOPPING, PLUGIN_STARTED, PLUGIN_STOPPED, PLUGIN_FAILED];
}

/// Well-known domain topics exchanged between media plugins.
pub mod topics {
    pub const FILE_UPLOADED: &str = "file.uploaded";
    pub const TRANSCODING_STARTED: &str = "transcoding.started";
    pub const TRANSCODING_COMPLETED: &str = "transcoding.completed";
    pub const TRANSCODING_FAILED: &str = "transcoding.failed";
    pub const STREAMING_STARTED: &str = "streaming.started";
    pub const STREAMING_STOPPED: &str = "streaming.stopped";
    pub const METADATA_CREATED: &str = "metadata.created";
    pub const METADATA_UPDATED: &str = "metadata.updated";
    pub const METADATA_DELETED: &str = "metadata.deleted";
    pub const JOB_SUBMITTED: &str = "job.submitted";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const ALERT_TRIGGERED: &str = "alert.triggered";
    pub const ALERT_RESOLVED: &str = "alert.resolved";
    /// Periodic liveness signal.
    pub const HEARTBEAT: &str = "plugin.heartbeat";
}

/// Lifecycle notifications the kernel publishes on the [`kernel`] topics.
///
/// Each variant is carried as the JSON payload of an [`Event`] whose topic is
/// [`KernelEvent::topic`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelEvent {
    /// Every registered plugin started.
    Started { plugins: Vec<String> },
    /// Shutdown began.
    Stopping { plugins: Vec<String> },
    PluginStarted { plugin: String, version: String },
    PluginStopped { plugin: String },
    /// A plugin failed `phase` (`init`, `start` or `stop`).
    PluginFailed { plugin: String, phase: String, error: String },
}

impl KernelEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            KernelEvent::Started { .. } => kernel::STARTED,
            KernelEvent::Stopping { .. } => kernel::STOPPING,
            KernelEvent::PluginStarted { .. } => kernel::PLUGIN_STARTED,
            KernelEvent::PluginStopped { .. } => kernel::PLUGIN_STOPPED,
            KernelEvent::PluginFailed { .. } => kernel::PLUGIN_FAILED,
        }
    }

    pub fn into_event(self, producer: &str) -> Result<Event> {
        Event::json(self.topic(), producer, &self)
    }

    /// Decode a kernel lifecycle event. Returns `None` for events on other topics.
    pub fn from_event(event: &Event) -> Option<Self> {
        if !kernel::ALL.contains(&event.topic()) {
            return None;
        }
        event.payload_json().ok()
    }
}
