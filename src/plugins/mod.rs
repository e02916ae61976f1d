//! Device plugin registry
//!
//! Plugins are discovered from `device.plugin.json` manifests in standard
//! directories. Each one owns a namespace of raw service ids; callers address
//! services by qualified id, which the registry composes and resolves.

pub mod discovery;
pub mod manifest;
pub mod registry;
pub mod service_id;

pub use discovery::{AdapterIndex, ManifestIndex, default_plugin_dirs, discover_manifests};
pub use manifest::{
    DevicePlugin, GATEWAY_PLUGIN_ID, MANIFEST_FILE, PluginManifest, is_valid_plugin_id,
};
pub use registry::PluginRegistry;
pub use service_id::QualifiedServiceId;
