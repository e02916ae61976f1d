//! Event fan-out from adapters to subscribed receivers

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::session::{EventSession, SessionKey, eq_ignore_case};
use super::table::EventSessionTable;
use crate::Result;
use crate::message::Event;
use crate::plugins::PluginRegistry;

/// Profile carrying service-change notifications
pub const SERVICE_DISCOVERY_PROFILE: &str = "serviceDiscovery";

/// Attribute carrying service-change notifications
pub const SERVICE_CHANGE_ATTRIBUTE: &str = "onServiceChange";

/// Destination for outgoing events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hand an event to a receiver
    async fn deliver(&self, receiver_address: &str, event: &Event) -> Result<()>;
}

/// Matches adapter events to sessions and delivers them
pub struct EventBroker {
    table: Arc<EventSessionTable>,
    registry: Arc<PluginRegistry>,
    sink: Arc<dyn EventSink>,
}

impl EventBroker {
    #[must_use]
    pub fn new(
        table: Arc<EventSessionTable>,
        registry: Arc<PluginRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            table,
            registry,
            sink,
        }
    }

    /// Dispatch an event of unknown origin
    ///
    /// Returns the receiver addresses the event was delivered to.
    pub async fn on_event(&self, event: Event) -> Vec<String> {
        self.dispatch(None, event).await
    }

    /// Dispatch an event pushed by a known plugin
    ///
    /// Only sessions created against that plugin can match.
    pub async fn on_event_from(&self, plugin_id: &str, event: Event) -> Vec<String> {
        self.dispatch(Some(plugin_id), event).await
    }

    async fn dispatch(&self, source: Option<&str>, event: Event) -> Vec<String> {
        if is_service_change(&event) {
            return self.on_service_change(source, event).await;
        }

        let sessions = self.matching_sessions(source, &event).await;
        if sessions.is_empty() {
            tracing::debug!(
                plugin_id = ?source,
                service_id = ?event.service_id,
                profile = ?event.profile,
                attribute = ?event.attribute,
                "no session for event, dropping"
            );
            return Vec::new();
        }

        let mut delivered = Vec::with_capacity(sessions.len());
        for session in sessions {
            let Some(plugin) = self.registry.get(&session.plugin_id).await else {
                tracing::warn!(plugin_id = %session.plugin_id, "session of unknown plugin, skipping");
                continue;
            };

            let mut outgoing = event.clone();
            outgoing.service_id = session
                .service_id
                .as_deref()
                .map(|raw| PluginRegistry::append_service_id(&plugin, raw));
            if self.send(&session, outgoing).await {
                delivered.push(session.receiver_address);
            }
        }
        delivered
    }

    /// Token strategy first, session key when the event carries no token
    async fn matching_sessions(&self, source: Option<&str>, event: &Event) -> Vec<EventSession> {
        let from_source = |s: &EventSession| source.is_none_or(|p| s.plugin_id == p);
        let same_target = |s: &EventSession| {
            s.service_id == event.service_id
                && s.matches_path(
                    event.profile.as_deref(),
                    event.interface.as_deref(),
                    event.attribute.as_deref(),
                )
        };

        if let Some(token) = event.access_token.as_deref().filter(|t| !t.is_empty()) {
            return self
                .table
                .find(|s| {
                    s.access_token.as_deref() == Some(token) && same_target(s) && from_source(s)
                })
                .await;
        }

        let Some(raw_key) = event.session_key.as_deref() else {
            tracing::warn!(profile = ?event.profile, "event has neither token nor session key");
            return Vec::new();
        };
        let key = match raw_key.parse::<SessionKey>() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "unusable session key on event");
                return Vec::new();
            }
        };

        self.table
            .find(|s| {
                s.receiver_id == key.receiver_id
                    && s.plugin_id == key.plugin_id
                    && same_target(s)
                    && from_source(s)
            })
            .await
    }

    async fn on_service_change(&self, source: Option<&str>, mut event: Event) -> Vec<String> {
        let Some(plugin_id) = self.originating_plugin(source, &event).await else {
            tracing::warn!("service change from unknown plugin, dropping");
            return Vec::new();
        };
        let Some(plugin) = self.registry.get(&plugin_id).await else {
            tracing::warn!(plugin_id = %plugin_id, "service change from unregistered plugin, dropping");
            return Vec::new();
        };

        if let Some(Value::Object(service)) = event.body.get_mut("networkService")
            && let Some(Value::String(id)) = service.get_mut("id")
        {
            *id = PluginRegistry::append_service_id(&plugin, id);
        }

        let sessions = self
            .table
            .find(|s| {
                s.matches_path(
                    event.profile.as_deref(),
                    event.interface.as_deref(),
                    event.attribute.as_deref(),
                )
            })
            .await;

        let mut delivered = Vec::with_capacity(sessions.len());
        for session in sessions {
            let mut outgoing = event.clone();
            outgoing.service_id = None;
            if self.send(&session, outgoing).await {
                delivered.push(session.receiver_address);
            }
        }

        tracing::debug!(plugin_id = %plugin_id, receivers = delivered.len(), "service change dispatched");
        delivered
    }

    /// Plugin a service-change event came from
    async fn originating_plugin(&self, source: Option<&str>, event: &Event) -> Option<String> {
        if let Some(plugin_id) = source {
            return Some(plugin_id.to_string());
        }

        if let Some(token) = event.access_token.as_deref().filter(|t| !t.is_empty()) {
            if self.registry.contains(token).await {
                return Some(token.to_string());
            }
            if let Some(session) = self
                .table
                .find(|s| s.access_token.as_deref() == Some(token))
                .await
                .into_iter()
                .next()
            {
                return Some(session.plugin_id);
            }
        }

        event
            .session_key
            .as_deref()
            .and_then(|k| k.parse::<SessionKey>().ok())
            .map(|k| k.plugin_id)
    }

    async fn send(&self, session: &EventSession, mut event: Event) -> bool {
        event.receiver_address = Some(session.receiver_address.clone());
        event.access_token.clone_from(&session.access_token);

        match self.sink.deliver(&session.receiver_address, &event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    receiver = %session.receiver_address,
                    error = %e,
                    "event delivery failed"
                );
                false
            }
        }
    }
}

/// Whether an event announces a change in the service list
#[must_use]
pub fn is_service_change(event: &Event) -> bool {
    eq_ignore_case(event.profile.as_deref(), Some(SERVICE_DISCOVERY_PROFILE))
        && eq_ignore_case(event.attribute.as_deref(), Some(SERVICE_CHANGE_ATTRIBUTE))
}
