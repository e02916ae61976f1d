//! Event subscriptions and legacy session keys

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::Error;

/// Separator between receiver id and plugin id in a session key
pub const SESSION_KEY_SEPARATOR: char = '.';

/// Separator before the optional receiver name suffix
pub const RECEIVER_NAME_SEPARATOR: char = '@';

/// Receiver id used when a request carries neither session key nor origin
pub const ANONYMOUS_ORIGIN: &str = "<anonymous>";

/// An active event subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSession {
    pub receiver_id: String,
    /// Where matching events are delivered
    pub receiver_address: String,
    /// Raw service id as the adapter knows it
    pub service_id: Option<String>,
    pub plugin_id: String,
    pub profile: Option<String>,
    pub interface: Option<String>,
    pub attribute: Option<String>,
    pub access_token: Option<String>,
}

impl EventSession {
    /// Whether two sessions share the same subscription key
    ///
    /// Profile, interface and attribute compare case-insensitively.
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.receiver_id == other.receiver_id
            && self.service_id == other.service_id
            && self.plugin_id == other.plugin_id
            && self.matches_path(
                other.profile.as_deref(),
                other.interface.as_deref(),
                other.attribute.as_deref(),
            )
    }

    /// Whether the session is subscribed to a profile/interface/attribute
    #[must_use]
    pub fn matches_path(
        &self,
        profile: Option<&str>,
        interface: Option<&str>,
        attribute: Option<&str>,
    ) -> bool {
        eq_ignore_case(self.profile.as_deref(), profile)
            && eq_ignore_case(self.interface.as_deref(), interface)
            && eq_ignore_case(self.attribute.as_deref(), attribute)
    }
}

/// Case-insensitive comparison where absent equals only absent
#[must_use]
pub fn eq_ignore_case(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

/// Legacy combined receiver/plugin key
///
/// String form is `{receiver_id}.{plugin_id}` optionally followed by
/// `@{receiver_name}`. Parsing strips the name after the last `@` and splits
/// at the last `.`, so receiver ids may contain dots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub receiver_id: String,
    pub plugin_id: String,
    pub receiver_name: Option<String>,
}

impl SessionKey {
    #[must_use]
    pub fn new(receiver_id: &str, plugin_id: &str) -> Self {
        Self {
            receiver_id: receiver_id.to_string(),
            plugin_id: plugin_id.to_string(),
            receiver_name: None,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SESSION_KEY_SEPARATOR}{}",
            self.receiver_id, self.plugin_id
        )?;
        if let Some(name) = &self.receiver_name {
            write!(f, "{RECEIVER_NAME_SEPARATOR}{name}")?;
        }
        Ok(())
    }
}

impl FromStr for SessionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, receiver_name) = match s.rsplit_once(RECEIVER_NAME_SEPARATOR) {
            Some((key, name)) => (key, Some(name.to_string())),
            None => (s, None),
        };
        let (receiver_id, plugin_id) = key
            .rsplit_once(SESSION_KEY_SEPARATOR)
            .filter(|(r, p)| !r.is_empty() && !p.is_empty())
            .ok_or_else(|| Error::MalformedRequest(format!("invalid session key: {s}")))?;

        Ok(Self {
            receiver_id: receiver_id.to_string(),
            plugin_id: plugin_id.to_string(),
            receiver_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(receiver: &str, attribute: &str) -> EventSession {
        EventSession {
            receiver_id: receiver.to_string(),
            receiver_address: receiver.to_string(),
            service_id: Some("001".to_string()),
            plugin_id: "cam1".to_string(),
            profile: Some("camera".to_string()),
            interface: None,
            attribute: Some(attribute.to_string()),
            access_token: Some("t1".to_string()),
        }
    }

    #[test]
    fn key_ignores_case_of_path_only() {
        assert!(session("R", "onPhoto").same_key(&session("R", "ONPHOTO")));
        assert!(!session("R", "onPhoto").same_key(&session("r", "onPhoto")));
    }

    #[test]
    fn key_ignores_token_and_address() {
        let mut other = session("R", "onPhoto");
        other.access_token = Some("t2".to_string());
        other.receiver_address = "elsewhere".to_string();
        assert!(session("R", "onPhoto").same_key(&other));
    }

    #[test]
    fn absent_equals_only_absent() {
        assert!(eq_ignore_case(None, None));
        assert!(!eq_ignore_case(None, Some("")));
        assert!(!eq_ignore_case(Some("a"), None));
    }

    #[test]
    fn session_key_parsing() {
        let key: SessionKey = "com.example.app.cam1@main".parse().unwrap();
        assert_eq!(key.receiver_id, "com.example.app");
        assert_eq!(key.plugin_id, "cam1");
        assert_eq!(key.receiver_name.as_deref(), Some("main"));
        assert_eq!(key.to_string(), "com.example.app.cam1@main");

        let plain: SessionKey = "R1.cam1".parse().unwrap();
        assert_eq!(plain, SessionKey::new("R1", "cam1"));
    }

    #[test]
    fn session_key_without_plugin_is_malformed() {
        assert!("R1".parse::<SessionKey>().is_err());
        assert!("R1.".parse::<SessionKey>().is_err());
    }
}
