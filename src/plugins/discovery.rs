//! Adapter discovery - scan directories for `device.plugin.json` manifests

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::manifest::{DevicePlugin, MANIFEST_FILE, PluginManifest, is_valid_plugin_id};

/// Source of the currently installed adapters
pub trait AdapterIndex: Send + Sync {
    /// Snapshot of installed adapters
    fn installed(&self) -> Vec<DevicePlugin>;
}

impl AdapterIndex for Vec<DevicePlugin> {
    fn installed(&self) -> Vec<DevicePlugin> {
        self.clone()
    }
}

/// Index backed by manifest files on disk
#[derive(Debug, Clone)]
pub struct ManifestIndex {
    dirs: Vec<PathBuf>,
}

impl ManifestIndex {
    #[must_use]
    pub const fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl AdapterIndex for ManifestIndex {
    fn installed(&self) -> Vec<DevicePlugin> {
        discover_manifests(&self.dirs)
            .into_iter()
            .map(|(path, manifest)| DevicePlugin::from_manifest(&path, manifest))
            .collect()
    }
}

/// Scan plugin directories for manifests
///
/// Looks for `device.plugin.json` files in immediate subdirectories of each
/// search path. Manifests with an unusable id are skipped; when two
/// directories declare the same id the first one found wins.
#[must_use]
pub fn discover_manifests(dirs: &[PathBuf]) -> Vec<(PathBuf, PluginManifest)> {
    let mut results = Vec::new();
    let mut seen = HashSet::new();

    for dir in dirs {
        if !dir.is_dir() {
            tracing::debug!(path = %dir.display(), "plugin directory does not exist, skipping");
            continue;
        }

        let Ok(entries) = std::fs::read_dir(dir) else {
            tracing::warn!(path = %dir.display(), "failed to read plugin directory");
            continue;
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        paths.sort();

        for path in paths {
            let Some(manifest) = load_manifest(&path.join(MANIFEST_FILE)) else {
                continue;
            };

            if !is_valid_plugin_id(&manifest.id) {
                tracing::warn!(plugin_id = %manifest.id, path = %path.display(), "invalid plugin id, skipping");
                continue;
            }
            if !seen.insert(manifest.id.clone()) {
                tracing::warn!(plugin_id = %manifest.id, path = %path.display(), "duplicate plugin id, skipping");
                continue;
            }

            tracing::debug!(
                plugin_id = %manifest.id,
                path = %path.display(),
                "discovered plugin"
            );
            results.push((path, manifest));
        }
    }

    results
}

/// Load and parse a single manifest file
fn load_manifest(path: &Path) -> Option<PluginManifest> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<PluginManifest>(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse plugin manifest"
            );
            None
        }
    }
}

/// Default plugin search directories
#[must_use]
pub fn default_plugin_dirs() -> Vec<PathBuf> {
    let Some(base) = directories::BaseDirs::new() else {
        return Vec::new();
    };

    vec![
        base.config_dir().join("device-gateway").join("plugins"),
        base.data_dir().join("device-gateway").join("plugins"),
    ]
}
