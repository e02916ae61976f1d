//! Register/unregister transitions for event subscriptions

use super::session::{ANONYMOUS_ORIGIN, EventSession, SessionKey};
use super::table::EventSessionTable;
use crate::message::Request;
use crate::plugins::DevicePlugin;
use crate::security::Origin;
use crate::{Error, Result};

/// Derives subscription keys from requests and applies them to the table
#[derive(Debug, Clone, Copy)]
pub struct EventProtocol {
    require_origin: bool,
}

impl EventProtocol {
    #[must_use]
    pub const fn new(require_origin: bool) -> Self {
        Self { require_origin }
    }

    /// Receiver a request subscribes on behalf of
    ///
    /// An explicit session key wins, then the origin in normalized form.
    /// Requests with neither fall back to the anonymous receiver only when
    /// origins are not enforced.
    #[must_use]
    pub fn receiver_id(&self, request: &Request) -> Option<String> {
        if let Some(key) = non_empty(request.session_key.as_deref()) {
            return Some(key.to_string());
        }
        non_empty(request.origin.as_deref())
            .map(|origin| Origin::parse(origin).to_string())
            .or_else(|| (!self.require_origin).then(|| ANONYMOUS_ORIGIN.to_string()))
    }

    /// Build the session a register or unregister request refers to
    ///
    /// # Errors
    ///
    /// Returns `MalformedRequest` if no receiver can be derived
    pub fn session_for(
        &self,
        request: &Request,
        plugin: &DevicePlugin,
        raw_service_id: Option<&str>,
    ) -> Result<EventSession> {
        let receiver_id = self
            .receiver_id(request)
            .ok_or_else(|| Error::MalformedRequest("no receiver for event session".to_string()))?;

        // Events go where the caller asked, else to the key or origin as sent
        let receiver_address = non_empty(request.receiver_address.as_deref())
            .or_else(|| non_empty(request.session_key.as_deref()))
            .or_else(|| non_empty(request.origin.as_deref()).map(str::trim))
            .map_or_else(|| receiver_id.clone(), ToString::to_string);

        Ok(EventSession {
            receiver_address,
            receiver_id,
            service_id: raw_service_id.map(ToString::to_string),
            plugin_id: plugin.plugin_id.clone(),
            profile: request.profile.clone(),
            interface: request.interface.clone(),
            attribute: request.attribute.clone(),
            access_token: Some(
                non_empty(request.access_token.as_deref())
                    .unwrap_or(&plugin.plugin_id)
                    .to_string(),
            ),
        })
    }

    /// Register a subscription
    ///
    /// Returns false when an identical subscription already existed.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRequest` if no receiver can be derived
    pub async fn add_session(
        &self,
        table: &EventSessionTable,
        request: &Request,
        plugin: &DevicePlugin,
        raw_service_id: Option<&str>,
    ) -> Result<bool> {
        let session = self.session_for(request, plugin, raw_service_id)?;
        let receiver = session.receiver_id.clone();
        let added = table.add(session).await;

        tracing::debug!(
            receiver = %receiver,
            plugin_id = %plugin.plugin_id,
            path = %request.path(),
            added,
            "event session registered"
        );
        Ok(added)
    }

    /// Cancel a subscription
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if nothing matched, or `MalformedRequest` if
    /// no receiver can be derived
    pub async fn remove_session(
        &self,
        table: &EventSessionTable,
        request: &Request,
        plugin: &DevicePlugin,
        raw_service_id: Option<&str>,
    ) -> Result<()> {
        let session = self.session_for(request, plugin, raw_service_id)?;
        if table.remove(&session).await {
            tracing::debug!(
                receiver = %session.receiver_id,
                plugin_id = %plugin.plugin_id,
                path = %request.path(),
                "event session unregistered"
            );
            Ok(())
        } else {
            Err(Error::SessionNotFound)
        }
    }

    /// Attach the legacy session key expected by old adapters
    pub fn prepare_forward(&self, request: &mut Request, plugin: &DevicePlugin) {
        if !plugin.is_legacy_sdk() {
            return;
        }
        if let Some(receiver_id) = self.receiver_id(request) {
            request.session_key = Some(SessionKey::new(&receiver_id, &plugin.plugin_id).to_string());
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Action;

    fn register(origin: Option<&str>) -> Request {
        let mut request = Request::new(Action::Register, "camera").with_attribute("onPhoto");
        request.origin = origin.map(ToString::to_string);
        request
    }

    #[test]
    fn receiver_precedence() {
        let protocol = EventProtocol::new(true);
        let request = register(Some("https://a.example"));
        assert_eq!(protocol.receiver_id(&request).as_deref(), Some("https://a.example:443"));
        assert_eq!(
            protocol.receiver_id(&register(Some("https://a.example:443"))),
            protocol.receiver_id(&request)
        );

        let keyed = request.with_session_key("R1");
        assert_eq!(protocol.receiver_id(&keyed).as_deref(), Some("R1"));
    }

    #[test]
    fn anonymous_only_without_origin_policy() {
        assert_eq!(EventProtocol::new(true).receiver_id(&register(None)), None);
        assert_eq!(
            EventProtocol::new(false).receiver_id(&register(None)).as_deref(),
            Some(ANONYMOUS_ORIGIN)
        );
    }

    #[test]
    fn token_defaults_to_plugin_id() {
        let protocol = EventProtocol::new(true);
        let plugin = DevicePlugin::new("cam1");

        let session = protocol
            .session_for(&register(Some("o")), &plugin, Some("001"))
            .unwrap();
        assert_eq!(session.access_token.as_deref(), Some("cam1"));
        assert_eq!(session.receiver_address, "o");

        let session = protocol
            .session_for(
                &register(Some("o")).with_access_token("t1").with_receiver("R1"),
                &plugin,
                Some("001"),
            )
            .unwrap();
        assert_eq!(session.access_token.as_deref(), Some("t1"));
        assert_eq!(session.receiver_address, "R1");
    }

    #[tokio::test]
    async fn register_then_unregister() {
        let protocol = EventProtocol::new(true);
        let table = EventSessionTable::new();
        let plugin = DevicePlugin::new("cam1");
        let request = register(Some("o"));

        assert!(protocol.add_session(&table, &request, &plugin, Some("001")).await.unwrap());
        assert!(!protocol.add_session(&table, &request, &plugin, Some("001")).await.unwrap());
        protocol
            .remove_session(&table, &request, &plugin, Some("001"))
            .await
            .unwrap();
        assert!(matches!(
            protocol.remove_session(&table, &request, &plugin, Some("001")).await,
            Err(Error::SessionNotFound)
        ));
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn no_receiver_is_not_registered() {
        let protocol = EventProtocol::new(true);
        let table = EventSessionTable::new();
        let result = protocol
            .add_session(&table, &register(None), &DevicePlugin::new("cam1"), None)
            .await;
        assert!(matches!(result, Err(Error::MalformedRequest(_))));
        assert!(table.is_empty().await);
    }

    #[test]
    fn legacy_adapters_get_session_key() {
        let protocol = EventProtocol::new(true);
        let legacy = DevicePlugin::new("cam1").with_sdk_version("1.0.0");
        let current = DevicePlugin::new("cam1");

        let mut request = register(Some("R1"));
        protocol.prepare_forward(&mut request, &current);
        assert_eq!(request.session_key, None);

        protocol.prepare_forward(&mut request, &legacy);
        assert_eq!(request.session_key.as_deref(), Some("R1.cam1"));
    }
}
