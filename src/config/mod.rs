//! Configuration management for the device gateway
//!
//! Values are resolved with precedence env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use file::GatewayConfigFile;

use crate::plugins::default_plugin_dirs;
use crate::{Error, Result};

/// Default API server port
pub const DEFAULT_PORT: u16 = 4035;

/// Default bounded wait for adapter responses
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default access token lifetime in days
const DEFAULT_TOKEN_TTL_DAYS: i64 = 180;

/// Longest accepted access token lifetime in days
const MAX_TOKEN_TTL_DAYS: i64 = 3650;

/// Database file name inside the data directory
const DB_FILE: &str = "gateway.db";

/// Device gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API server port
    pub port: u16,

    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Reject requests that carry no origin
    pub require_origin: bool,

    /// Restrict origins to the whitelist
    pub block_origin: bool,

    /// Require access tokens on device profiles
    pub local_oauth: bool,

    /// Origins accepted regardless of the whitelist
    pub always_allowed: Vec<String>,

    /// Bounded wait for adapter responses
    pub adapter_timeout: Duration,

    /// Directories scanned for plugin manifests
    pub plugin_dirs: Vec<PathBuf>,

    /// Access token lifetime
    pub token_ttl: chrono::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            require_origin: true,
            block_origin: false,
            local_oauth: true,
            always_allowed: vec!["file://".to_string()],
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
            plugin_dirs: default_plugin_dirs(),
            token_ttl: chrono::Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn load() -> Result<Self> {
        Self::from_sources(&file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn from_sources<F>(fc: &GatewayConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str| env(key).map(|v| v == "true" || v == "1");

        let port = env("DEVGATE_PORT")
            .and_then(|s| s.parse().ok())
            .or(fc.server.port)
            .unwrap_or(defaults.port);

        let data_dir = env("DEVGATE_DATA_DIR")
            .or_else(|| fc.server.data_dir.clone())
            .map_or(defaults.data_dir, PathBuf::from);

        let adapter_timeout = env("DEVGATE_ADAPTER_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .or(fc.plugins.timeout_ms)
            .map_or(defaults.adapter_timeout, Duration::from_millis);
        if adapter_timeout.is_zero() {
            return Err(Error::Config("adapter timeout must be positive".to_string()));
        }

        let plugin_dirs = env("DEVGATE_PLUGIN_DIRS").map_or_else(
            || {
                fc.plugins.dirs.as_ref().map_or(defaults.plugin_dirs, |dirs| {
                    dirs.iter().map(PathBuf::from).collect()
                })
            },
            |dirs| std::env::split_paths(&dirs).collect(),
        );

        let ttl_days = fc.security.token_ttl_days.unwrap_or(DEFAULT_TOKEN_TTL_DAYS);
        if !(1..=MAX_TOKEN_TTL_DAYS).contains(&ttl_days) {
            return Err(Error::Config(format!(
                "token lifetime must be between 1 and {MAX_TOKEN_TTL_DAYS} days"
            )));
        }

        Ok(Self {
            port,
            data_dir,
            require_origin: flag("DEVGATE_REQUIRE_ORIGIN")
                .or(fc.security.require_origin)
                .unwrap_or(defaults.require_origin),
            block_origin: flag("DEVGATE_BLOCK_ORIGIN")
                .or(fc.security.block_origin)
                .unwrap_or(defaults.block_origin),
            local_oauth: flag("DEVGATE_LOCAL_OAUTH")
                .or(fc.security.local_oauth)
                .unwrap_or(defaults.local_oauth),
            always_allowed: fc
                .security
                .always_allowed
                .clone()
                .unwrap_or(defaults.always_allowed),
            adapter_timeout,
            plugin_dirs,
            token_ttl: chrono::Duration::days(ttl_days),
        })
    }

    /// Path of the database file
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}

/// Default data directory: `~/.local/share/device-gateway`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/device-gateway"),
        |d| d.data_dir().join("device-gateway"),
    )
}
