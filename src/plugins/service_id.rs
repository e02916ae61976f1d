//! Qualified service ids
//!
//! Adapters name their services with raw ids that are only unique within
//! the adapter. Callers see qualified ids that also carry the plugin id.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Separator between the raw id and the plugin id
pub const SEPARATOR: char = ':';

/// A raw service id tagged with the plugin that owns it
///
/// The string form is `{raw_id}:{plugin_id}`, or just `{plugin_id}` when the
/// raw id is empty. Parsing splits at the last separator; plugin ids never
/// contain it, so raw ids may.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedServiceId {
    pub plugin_id: String,
    pub raw_id: String,
}

impl QualifiedServiceId {
    #[must_use]
    pub fn new(plugin_id: &str, raw_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            raw_id: raw_id.to_string(),
        }
    }
}

impl fmt::Display for QualifiedServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw_id.is_empty() {
            write!(f, "{}", self.plugin_id)
        } else {
            write!(f, "{}{SEPARATOR}{}", self.raw_id, self.plugin_id)
        }
    }
}

impl FromStr for QualifiedServiceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (raw_id, plugin_id) = s.rsplit_once(SEPARATOR).unwrap_or(("", s));
        if plugin_id.is_empty() {
            return Err(Error::PluginNotFound(s.to_string()));
        }
        Ok(Self::new(plugin_id, raw_id))
    }
}
