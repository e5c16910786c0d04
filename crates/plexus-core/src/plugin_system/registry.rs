use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::kernel::error::{Error, Result};
use crate::plugin_system::traits::{Plugin, PluginDescriptor, PluginState};

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    state: Mutex<PluginState>,
}

impl RegisteredPlugin {
    fn state(&self) -> PluginState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ordered collection of the plugins owned by one kernel.
///
/// Iteration order is registration order and is never re-sorted. Once the
/// kernel starts the registry is frozen: membership is fixed and only the
/// per-plugin lifecycle states change.
pub struct PluginRegistry {
    plugins: Vec<RegisteredPlugin>,
    index: HashMap<String, usize>,
    frozen: bool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            index: HashMap::new(),
            frozen: false,
        }
    }

    /// Register a plugin at the end of the startup order.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if self.frozen {
            return Err(Error::InvalidState {
                operation: format!("register plugin '{}'", name),
                state: "registry frozen after kernel start".to_string(),
            });
        }
        if name.trim().is_empty() {
            return Err(Error::InvalidPluginName {
                name,
                reason: "name must not be empty".to_string(),
            });
        }
        if self.index.contains_key(&name) {
            return Err(Error::DuplicatePlugin { name });
        }

        self.index.insert(name.clone(), self.plugins.len());
        self.plugins.push(RegisteredPlugin {
            plugin,
            state: Mutex::new(PluginState::Registered),
        });
        log::info!("Registered plugin '{}' at position {}", name, self.plugins.len());
        Ok(())
    }

    /// Fix membership. Further registrations fail with `InvalidState`.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// All plugins in registration order.
    pub fn all(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.iter().map(|entry| Arc::clone(&entry.plugin)).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.index.get(name).map(|&i| Arc::clone(&self.plugins[i].plugin))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|entry| entry.plugin.name().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .map(|entry| PluginDescriptor::of(entry.plugin.as_ref()))
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.index.get(name).map(|&i| self.plugins[i].state())
    }

    /// Every plugin's state, in registration order.
    pub fn states(&self) -> Vec<(String, PluginState)> {
        self.plugins
            .iter()
            .map(|entry| (entry.plugin.name().to_string(), entry.state()))
            .collect()
    }

    /// Plugins currently in `state`, in registration order.
    pub fn in_state(&self, state: PluginState) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|entry| entry.state() == state)
            .map(|entry| Arc::clone(&entry.plugin))
            .collect()
    }

    /// Move a plugin to `next`, refusing transitions that skip a state.
    pub fn transition(&self, name: &str, next: PluginState) -> Result<PluginState> {
        let &i = self.index.get(name).ok_or_else(|| Error::PluginNotFound {
            name: name.to_string(),
        })?;
        let mut state = self.plugins[i]
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = *state;
        if !previous.can_transition_to(next) {
            return Err(Error::InvalidState {
                operation: format!("move plugin '{}' to {}", name, next),
                state: previous.to_string(),
            });
        }
        *state = next;
        log::debug!("Plugin '{}': {} -> {}", name, previous, next);
        Ok(previous)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.states())
            .field("frozen", &self.frozen)
            .finish()
    }
}
