//! Error types for the device gateway

use thiserror::Error;

use crate::security::OriginError;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the device gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Origin check rejected the caller
    #[error("invalid origin: {0}")]
    Origin(#[from] OriginError),

    /// Qualified service id names an unknown plugin
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// Adapter did not answer within the bounded wait
    #[error("timed out waiting for plugin {0}")]
    Timeout(String),

    /// Missing, invalid or expired access token
    #[error("permission denied: {0}")]
    Permission(String),

    /// Request is missing required fields or is otherwise unusable
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Unregister without a matching session (non-fatal)
    #[error("event session not found")]
    SessionNotFound,

    /// Adapter-side failure, tagged with the originating plugin
    #[error("plugin {plugin_id}: {message}")]
    Adapter { plugin_id: String, message: String },

    /// Event could not be handed to its receiver
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for an adapter failure
    #[must_use]
    pub fn adapter(plugin_id: &str, message: impl Into<String>) -> Self {
        Self::Adapter {
            plugin_id: plugin_id.to_string(),
            message: message.into(),
        }
    }

    /// Plugin the error is attributed to, if any
    #[must_use]
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Timeout(id) | Self::Adapter { plugin_id: id, .. } => Some(id),
            _ => None,
        }
    }
}
