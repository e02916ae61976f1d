//! Device plugin manifest format (`device.plugin.json`)

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Manifest file looked up in each plugin directory
pub const MANIFEST_FILE: &str = "device.plugin.json";

/// Plugin id reserved for the gateway's own profiles
pub const GATEWAY_PLUGIN_ID: &str = "gateway";

/// SDK version assumed when a manifest does not declare one
const DEFAULT_SDK_VERSION: &str = "2.0.0";

/// Manifest describing an installed device adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin identifier (e.g. "hue-bridge")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Semver version string
    #[serde(default)]
    pub version: Option<String>,
    /// Adapter SDK the plugin was built against
    #[serde(default)]
    pub sdk_version: Option<String>,
    /// Where the adapter process can be reached
    #[serde(default)]
    pub component: Option<String>,
    /// Prefix the adapter uses for its raw service ids
    #[serde(default)]
    pub service_id_prefix: Option<String>,
    /// Profiles the adapter implements
    #[serde(default)]
    pub profiles: Vec<String>,
}

/// A known device adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePlugin {
    pub plugin_id: String,
    pub name: String,
    pub component_address: String,
    pub sdk_version: String,
    pub service_id_prefix: String,
    pub profiles: Vec<String>,
}

impl DevicePlugin {
    /// Create a plugin with default metadata
    #[must_use]
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            name: plugin_id.to_string(),
            component_address: plugin_id.to_string(),
            sdk_version: DEFAULT_SDK_VERSION.to_string(),
            service_id_prefix: String::new(),
            profiles: Vec::new(),
        }
    }

    /// Build from a manifest found in `dir`
    #[must_use]
    pub fn from_manifest(dir: &Path, manifest: PluginManifest) -> Self {
        Self {
            component_address: manifest
                .component
                .unwrap_or_else(|| dir.display().to_string()),
            sdk_version: manifest
                .sdk_version
                .unwrap_or_else(|| DEFAULT_SDK_VERSION.to_string()),
            service_id_prefix: manifest.service_id_prefix.unwrap_or_default(),
            profiles: manifest.profiles,
            name: manifest.name,
            plugin_id: manifest.id,
        }
    }

    #[must_use]
    pub fn with_sdk_version(mut self, version: &str) -> Self {
        self.sdk_version = version.to_string();
        self
    }

    #[must_use]
    pub fn with_profiles(mut self, profiles: &[&str]) -> Self {
        self.profiles = profiles.iter().map(ToString::to_string).collect();
        self
    }

    /// Whether the adapter predates token-based event routing
    ///
    /// Such adapters address events by session key only.
    #[must_use]
    pub fn is_legacy_sdk(&self) -> bool {
        self.sdk_version == "1.0" || self.sdk_version.starts_with("1.0.")
    }
}

/// Whether a plugin id is acceptable
///
/// Ids may only contain ASCII letters, digits, `-` and `_`, so they never
/// collide with the separators used in qualified service ids and session keys.
#[must_use]
pub fn is_valid_plugin_id(id: &str) -> bool {
    !id.is_empty()
        && id != GATEWAY_PLUGIN_ID
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
