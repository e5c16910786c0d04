use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use crate::event::error::Result;
use crate::event::{BusMode, Event, EventBus, EventHandler, SubscriptionHandle, sync_handler};
use crate::plugin_system::PluginDescriptor;

/// Descriptors of plugins that completed `init`, in init order.
pub(crate) type SharedDescriptors = Arc<RwLock<Vec<PluginDescriptor>>>;

/// Subscriptions taken through each plugin's [`KernelHandle`], so the kernel
/// can revoke them once the plugin is torn down.
#[derive(Default)]
pub(crate) struct SubscriptionLedger {
    entries: Mutex<HashMap<String, Vec<SubscriptionHandle>>>,
}

impl SubscriptionLedger {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<SubscriptionHandle>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track `handle` for `plugin`, dropping handles the plugin has already
    /// unsubscribed.
    pub(crate) fn record(&self, plugin: &str, handle: SubscriptionHandle) {
        let mut entries = self.lock();
        let handles = entries.entry(plugin.to_string()).or_default();
        handles.retain(SubscriptionHandle::is_active);
        handles.push(handle);
    }

    /// Handles currently tracked for `plugin`, active or not.
    #[cfg(test)]
    pub(crate) fn tracked(&self, plugin: &str) -> usize {
        self.lock().get(plugin).map(Vec::len).unwrap_or(0)
    }

    /// Unsubscribe everything `plugin` subscribed to. Returns how many
    /// subscriptions were still active.
    pub(crate) fn revoke_all(&self, plugin: &str) -> usize {
        let handles = self.lock().remove(plugin).unwrap_or_default();
        let revoked = handles.iter().filter(|handle| handle.unsubscribe()).count();
        if revoked > 0 {
            log::debug!("Revoked {} subscription(s) held by '{}'", revoked, plugin);
        }
        revoked
    }

    #[cfg(test)]
    pub(crate) fn active(&self, plugin: &str) -> usize {
        self.lock()
            .get(plugin)
            .map(|handles| handles.iter().filter(|handle| handle.is_active()).count())
            .unwrap_or(0)
    }
}

/// What a plugin receives in `init`: bus access under its own identity and a
/// read-only view of the other plugins' public descriptors.
///
/// Subscriptions made through the handle are owned by the plugin but also
/// tracked by the kernel, which revokes any still active once the plugin
/// stops or fails.
#[derive(Clone)]
pub struct KernelHandle {
    plugin: String,
    bus: Arc<dyn EventBus>,
    descriptors: SharedDescriptors,
    ledger: Arc<SubscriptionLedger>,
}

impl KernelHandle {
    pub(crate) fn new(
        plugin: impl Into<String>,
        bus: Arc<dyn EventBus>,
        descriptors: SharedDescriptors,
        ledger: Arc<SubscriptionLedger>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            bus,
            descriptors,
            ledger,
        }
    }

    /// Name of the plugin this handle was issued to; used as event producer.
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    pub fn bus_mode(&self) -> BusMode {
        self.bus.mode()
    }

    /// Publish raw bytes on `topic`.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.bus.publish(Event::new(topic, self.plugin.as_str(), payload)).await
    }

    /// Publish the JSON encoding of `value` on `topic`.
    pub async fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> Result<()> {
        self.bus.publish(Event::json(topic, self.plugin.as_str(), value)?).await
    }

    /// Subscribe with a payload callback.
    pub async fn subscribe<F>(&self, topic: &str, handler: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.subscribe_event(topic, sync_handler(move |event: &Event| handler(event.payload())))
            .await
    }

    /// Subscribe with a full [`EventHandler`], which sees the event's id,
    /// producer and timestamp as well as the payload.
    pub async fn subscribe_event(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<SubscriptionHandle> {
        let handle = self.bus.subscribe(topic, handler).await?;
        self.ledger.record(&self.plugin, handle.clone());
        Ok(handle)
    }

    /// Descriptors of every plugin that completed `init`, in init order.
    pub fn plugins(&self) -> Vec<PluginDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn plugin(&self, name: &str) -> Option<PluginDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|descriptor| descriptor.name == name)
            .cloned()
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle")
            .field("plugin", &self.plugin)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
