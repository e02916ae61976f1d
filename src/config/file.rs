//! TOML configuration file loading
//!
//! Supports `~/.config/device-gateway/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct GatewayConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Origin and authorization policy
    #[serde(default)]
    pub security: SecurityFileConfig,

    /// Adapter discovery and invocation
    #[serde(default)]
    pub plugins: PluginsFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Directory holding the database
    pub data_dir: Option<String>,
}

/// Origin and authorization policy
#[derive(Debug, Default, Deserialize)]
pub struct SecurityFileConfig {
    /// Reject requests without an origin
    pub require_origin: Option<bool>,

    /// Restrict origins to the whitelist
    pub block_origin: Option<bool>,

    /// Require access tokens on device profiles
    pub local_oauth: Option<bool>,

    /// Origins accepted regardless of the whitelist
    pub always_allowed: Option<Vec<String>>,

    /// Access token lifetime in days
    pub token_ttl_days: Option<i64>,
}

/// Adapter discovery and invocation
#[derive(Debug, Default, Deserialize)]
pub struct PluginsFileConfig {
    /// Directories scanned for plugin manifests
    pub dirs: Option<Vec<String>>,

    /// Bounded wait for adapter responses
    pub timeout_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `GatewayConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> GatewayConfigFile {
    config_file_path().map_or_else(GatewayConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
pub fn load_from(path: &Path) -> GatewayConfigFile {
    if !path.exists() {
        return GatewayConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                GatewayConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            GatewayConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/device-gateway/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("device-gateway").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partial_file() {
        let fc: GatewayConfigFile = toml::from_str(
            r#"
            [server]
            port = 4035

            [security]
            block_origin = true
            always_allowed = ["file://", "com.example.launcher"]
            "#,
        )
        .unwrap();

        assert_eq!(fc.server.port, Some(4035));
        assert_eq!(fc.security.block_origin, Some(true));
        assert_eq!(fc.security.require_origin, None);
        assert_eq!(fc.security.always_allowed.unwrap().len(), 2);
        assert!(fc.plugins.dirs.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_from(&dir.path().join("absent.toml"));
        assert!(fc.server.port.is_none());
    }

    #[test]
    fn invalid_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = [").unwrap();
        assert!(load_from(&path).server.port.is_none());
    }
}
