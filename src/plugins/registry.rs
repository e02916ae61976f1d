//! Registry of known device plugins and their attached adapters

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::discovery::AdapterIndex;
use super::manifest::{DevicePlugin, is_valid_plugin_id};
use super::service_id::QualifiedServiceId;
use crate::adapters::DeviceAdapter;
use crate::{Error, Result};

struct PluginEntry {
    plugin: DevicePlugin,
    adapter: Option<Arc<dyn DeviceAdapter>>,
}

/// Known plugins keyed by plugin id
///
/// Discovery, resolution and adapter attachment may run concurrently; every
/// operation takes the lock once.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, PluginEntry>>,
}

impl PluginRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the plugin map from an adapter index
    ///
    /// Plugins still installed keep their attached adapter. Returns the
    /// plugins that are no longer installed so their sessions and tokens can
    /// be cancelled.
    pub async fn discover_plugins(&self, index: &dyn AdapterIndex) -> Vec<DevicePlugin> {
        let installed = index.installed();

        let mut plugins = self.plugins.write().await;
        let mut next = HashMap::with_capacity(installed.len());
        for plugin in installed {
            if !is_valid_plugin_id(&plugin.plugin_id) {
                tracing::warn!(plugin_id = %plugin.plugin_id, "invalid plugin id, skipping");
                continue;
            }
            let adapter = plugins
                .remove(&plugin.plugin_id)
                .and_then(|entry| entry.adapter);
            next.insert(plugin.plugin_id.clone(), PluginEntry { plugin, adapter });
        }

        let removed: Vec<DevicePlugin> = plugins.drain().map(|(_, e)| e.plugin).collect();
        *plugins = next;

        tracing::info!(
            count = plugins.len(),
            removed = removed.len(),
            "plugins discovered"
        );
        removed
    }

    /// Register or replace a single plugin, keeping any attached adapter
    ///
    /// # Errors
    ///
    /// Returns error if the plugin id is not acceptable
    pub async fn register(&self, plugin: DevicePlugin) -> Result<()> {
        if !is_valid_plugin_id(&plugin.plugin_id) {
            return Err(Error::Config(format!(
                "invalid plugin id: {}",
                plugin.plugin_id
            )));
        }

        let mut plugins = self.plugins.write().await;
        let adapter = plugins
            .remove(&plugin.plugin_id)
            .and_then(|entry| entry.adapter);
        tracing::debug!(plugin_id = %plugin.plugin_id, "plugin registered");
        plugins.insert(plugin.plugin_id.clone(), PluginEntry { plugin, adapter });
        Ok(())
    }

    /// Remove a plugin, returning it if it was known
    pub async fn remove(&self, plugin_id: &str) -> Option<DevicePlugin> {
        self.plugins
            .write()
            .await
            .remove(plugin_id)
            .map(|entry| entry.plugin)
    }

    /// Attach a connected adapter to a known plugin
    ///
    /// A plugin has at most one adapter; a second connection is refused
    /// until the first one detaches.
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is unknown or already has an adapter
    pub async fn attach_adapter(&self, plugin_id: &str, adapter: Arc<dyn DeviceAdapter>) -> Result<()> {
        let mut plugins = self.plugins.write().await;
        let entry = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| Error::PluginNotFound(plugin_id.to_string()))?;
        if entry.adapter.is_some() {
            return Err(Error::adapter(plugin_id, "adapter already connected"));
        }

        entry.adapter = Some(adapter);
        tracing::info!(plugin_id, "adapter attached");
        Ok(())
    }

    /// Detach the adapter only if it is still the given one
    pub async fn detach_if_current(&self, plugin_id: &str, adapter: &Arc<dyn DeviceAdapter>) -> bool {
        let mut plugins = self.plugins.write().await;
        let Some(entry) = plugins.get_mut(plugin_id) else {
            return false;
        };
        if entry
            .adapter
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, adapter))
        {
            entry.adapter = None;
            tracing::info!(plugin_id, "adapter detached");
            true
        } else {
            false
        }
    }

    /// Connected adapter of a plugin
    pub async fn adapter(&self, plugin_id: &str) -> Option<Arc<dyn DeviceAdapter>> {
        self.plugins
            .read()
            .await
            .get(plugin_id)
            .and_then(|entry| entry.adapter.clone())
    }

    /// Get a plugin by ID
    pub async fn get(&self, plugin_id: &str) -> Option<DevicePlugin> {
        self.plugins
            .read()
            .await
            .get(plugin_id)
            .map(|entry| entry.plugin.clone())
    }

    /// Whether a plugin is registered
    pub async fn contains(&self, plugin_id: &str) -> bool {
        self.plugins.read().await.contains_key(plugin_id)
    }

    /// List all plugins, sorted by id
    pub async fn list(&self) -> Vec<DevicePlugin> {
        let mut plugins: Vec<DevicePlugin> = self
            .plugins
            .read()
            .await
            .values()
            .map(|entry| entry.plugin.clone())
            .collect();
        plugins.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        plugins
    }

    /// Resolve a qualified service id to its plugin and raw id
    ///
    /// # Errors
    ///
    /// Returns `PluginNotFound` if the embedded plugin is unknown
    pub async fn resolve(&self, qualified: &str) -> Result<(DevicePlugin, String)> {
        let id: QualifiedServiceId = qualified.parse()?;
        let plugin = self
            .get(&id.plugin_id)
            .await
            .ok_or_else(|| Error::PluginNotFound(qualified.to_string()))?;
        Ok((plugin, id.raw_id))
    }

    /// Compose the qualified form of a raw service id
    #[must_use]
    pub fn append_service_id(plugin: &DevicePlugin, raw_id: &str) -> String {
        QualifiedServiceId::new(&plugin.plugin_id, raw_id).to_string()
    }
}
