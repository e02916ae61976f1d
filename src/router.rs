//! Request routing
//!
//! Every request passes origin, shape and authorization checks before any
//! adapter sees it. Built-in profiles addressed to the gateway itself are
//! answered locally; everything else is forwarded to the adapter of the
//! plugin named by the qualified service id.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};

use crate::adapters::DeviceAdapter;
use crate::events::{EventProtocol, EventSessionTable, SERVICE_CHANGE_ATTRIBUTE};
use crate::message::{Action, ErrorCode, Request, Response};
use crate::plugins::{DevicePlugin, GATEWAY_PLUGIN_ID, PluginRegistry};
use crate::security::{LocalAuthorizationService, OriginValidator};
use crate::{Error, Result};

/// Profiles that never require an access token
const IGNORED_AUTH_PROFILES: &[&str] = &["authorization", "availability", "system", "files"];

pub const AUTHORIZATION_PROFILE: &str = "authorization";
pub const AVAILABILITY_PROFILE: &str = "availability";
pub const SYSTEM_PROFILE: &str = "system";
pub const SERVICE_DISCOVERY_PROFILE: &str = crate::events::SERVICE_DISCOVERY_PROFILE;

/// Origin recorded for callers that did not send one
const ANONYMOUS_TOKEN_ORIGIN: &str = crate::events::ANONYMOUS_ORIGIN;

/// Top-level request dispatcher
pub struct RequestRouter {
    registry: Arc<PluginRegistry>,
    validator: Arc<OriginValidator>,
    auth: LocalAuthorizationService,
    table: Arc<EventSessionTable>,
    protocol: EventProtocol,
    local_oauth: bool,
    timeout: Duration,
}

impl RequestRouter {
    #[must_use]
    pub fn new(
        registry: Arc<PluginRegistry>,
        validator: Arc<OriginValidator>,
        auth: LocalAuthorizationService,
        table: Arc<EventSessionTable>,
        local_oauth: bool,
        timeout: Duration,
    ) -> Self {
        let protocol = EventProtocol::new(validator.requires_origin());
        Self {
            registry,
            validator,
            auth,
            table,
            protocol,
            local_oauth,
            timeout,
        }
    }

    /// Route a request, producing exactly one response
    pub async fn route(&self, request: Request) -> Response {
        let path = request.path();
        let action = request.action;

        match self.try_route(request).await {
            Ok(response) => {
                tracing::debug!(path = %path, action = ?action, ok = response.is_ok(), "request routed");
                response
            }
            Err(e) => {
                tracing::debug!(path = %path, action = ?action, error = %e, "request rejected");
                Response::from(e)
            }
        }
    }

    async fn try_route(&self, mut request: Request) -> Result<Response> {
        self.validator.check_origin(request.origin.as_deref()).await?;

        let Some(profile) = request.profile.clone().filter(|p| !p.is_empty()) else {
            return Err(Error::MalformedRequest("profile is required".to_string()));
        };

        let service_id = request.service_id.clone().filter(|s| !s.is_empty());
        let is_builtin = service_id.is_none() && is_builtin_profile(&profile);

        // Tokens are issued by the authorization profile itself
        if profile.eq_ignore_ascii_case(AUTHORIZATION_PROFILE) {
            return self.authorize(&request).await;
        }

        self.check_authorization(&mut request, &profile, service_id.as_deref())?;

        if is_builtin {
            return self.handle_builtin(&request, &profile).await;
        }

        let Some(service_id) = service_id else {
            return Err(Error::MalformedRequest("serviceId is required".to_string()));
        };
        let (plugin, raw_id) = self.registry.resolve(&service_id).await?;
        self.forward(request, &plugin, &raw_id).await
    }

    /// Require a valid token unless local authorization is off or the
    /// profile is exempt. Attaches the stored token when the caller sent none.
    fn check_authorization(
        &self,
        request: &mut Request,
        profile: &str,
        service_id: Option<&str>,
    ) -> Result<()> {
        let origin = token_origin(request);
        let service = service_id.unwrap_or(GATEWAY_PLUGIN_ID);

        if !self.local_oauth || is_ignored_auth_profile(profile) {
            if request.access_token.is_none() {
                request.access_token = self.auth.get_access_token(&origin, service)?;
            }
            return Ok(());
        }

        let Some(token) = request.access_token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(Error::Permission("access token is required".to_string()));
        };
        if !self.auth.check(token, &origin, service, profile)? {
            return Err(Error::Permission("access token is invalid".to_string()));
        }
        Ok(())
    }

    /// Forward to the plugin's adapter with a bounded wait
    ///
    /// Subscriptions change only after the adapter accepted them.
    async fn forward(&self, request: Request, plugin: &DevicePlugin, raw_id: &str) -> Result<Response> {
        let is_subscription = matches!(request.action, Action::Register | Action::Unregister);
        if is_subscription && self.protocol.receiver_id(&request).is_none() {
            return Err(Error::MalformedRequest(
                "no receiver for event session".to_string(),
            ));
        }

        let adapter = self
            .registry
            .adapter(&plugin.plugin_id)
            .await
            .ok_or_else(|| Error::adapter(&plugin.plugin_id, "adapter not connected"))?;

        let mut forwarded = request.clone();
        forwarded.service_id = Some(raw_id.to_string());
        self.protocol.prepare_forward(&mut forwarded, plugin);

        let mut response = self.invoke(adapter.as_ref(), forwarded).await?;
        response.plugin_id = Some(plugin.plugin_id.clone());
        if !response.is_ok() {
            return Ok(response);
        }

        match request.action {
            Action::Register => {
                self.protocol
                    .add_session(&self.table, &request, plugin, Some(raw_id))
                    .await?;

                // The plugin may have been removed while the adapter answered
                if !self.registry.contains(&plugin.plugin_id).await {
                    let _ = self
                        .protocol
                        .remove_session(&self.table, &request, plugin, Some(raw_id))
                        .await;
                    tracing::warn!(plugin_id = %plugin.plugin_id, "plugin removed during registration");
                    return Err(Error::PluginNotFound(plugin.plugin_id.clone()));
                }
            }
            Action::Unregister => {
                if let Err(e) = self
                    .protocol
                    .remove_session(&self.table, &request, plugin, Some(raw_id))
                    .await
                {
                    tracing::warn!(plugin_id = %plugin.plugin_id, error = %e, "unregister without session");
                }
            }
            Action::Invoke => {}
        }

        Ok(response)
    }

    async fn invoke(&self, adapter: &dyn DeviceAdapter, request: Request) -> Result<Response> {
        let plugin_id = adapter.plugin_id().to_string();
        match tokio::time::timeout(self.timeout, adapter.invoke(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(plugin_id = %plugin_id, timeout_ms = self.timeout.as_millis(), "adapter timed out");
                Err(Error::Timeout(plugin_id))
            }
        }
    }

    async fn handle_builtin(&self, request: &Request, profile: &str) -> Result<Response> {
        if profile.eq_ignore_ascii_case(AVAILABILITY_PROFILE) {
            return Ok(Response::ok()
                .with("name", Value::from(env!("CARGO_PKG_NAME")))
                .with("version", Value::from(env!("CARGO_PKG_VERSION"))));
        }

        if profile.eq_ignore_ascii_case(SYSTEM_PROFILE) {
            return Ok(self.system().await);
        }

        // Service discovery
        match request.action {
            Action::Invoke => Ok(self.discover_services(request).await),
            Action::Register | Action::Unregister => self.service_change_subscription(request).await,
        }
    }

    async fn system(&self) -> Response {
        let mut plugins = Vec::new();
        for plugin in self.registry.list().await {
            let connected = self.registry.adapter(&plugin.plugin_id).await.is_some();
            plugins.push(json!({
                "id": plugin.plugin_id,
                "name": plugin.name,
                "sdkVersion": plugin.sdk_version,
                "serviceIdPrefix": plugin.service_id_prefix,
                "supports": plugin.profiles,
                "connected": connected,
            }));
        }

        Response::ok()
            .with("version", Value::from(env!("CARGO_PKG_VERSION")))
            .with(
                "supports",
                json!([AUTHORIZATION_PROFILE, AVAILABILITY_PROFILE, SERVICE_DISCOVERY_PROFILE, SYSTEM_PROFILE]),
            )
            .with("plugins", Value::Array(plugins))
    }

    /// Ask every connected adapter for its services and qualify their ids
    async fn discover_services(&self, request: &Request) -> Response {
        let mut targets = Vec::new();
        for plugin in self.registry.list().await {
            if let Some(adapter) = self.registry.adapter(&plugin.plugin_id).await {
                targets.push((plugin, adapter));
            }
        }

        let calls = targets.iter().map(|(plugin, adapter)| {
            let mut forwarded = request.clone();
            forwarded.service_id = None;
            self.protocol.prepare_forward(&mut forwarded, plugin);
            self.invoke(adapter.as_ref(), forwarded)
        });
        let results = join_all(calls).await;

        let mut services = Vec::new();
        for ((plugin, _), result) in targets.iter().zip(results) {
            match result {
                Ok(response) if response.is_ok() => {
                    services.extend(qualify_services(plugin, &response));
                }
                Ok(response) => {
                    tracing::warn!(plugin_id = %plugin.plugin_id, error = ?response.error_message, "service discovery failed");
                }
                Err(e) => {
                    tracing::warn!(plugin_id = %plugin.plugin_id, error = %e, "service discovery failed");
                }
            }
        }

        Response::ok().with("services", Value::Array(services))
    }

    async fn service_change_subscription(&self, request: &Request) -> Result<Response> {
        if !request
            .attribute
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(SERVICE_CHANGE_ATTRIBUTE))
        {
            return Ok(Response::error(
                ErrorCode::NotSupportProfile,
                format!("unsupported attribute: {}", request.path()),
            ));
        }

        let gateway = DevicePlugin::new(GATEWAY_PLUGIN_ID);
        if request.action == Action::Register {
            self.protocol.add_session(&self.table, request, &gateway, None).await?;
        } else if let Err(e) = self.protocol.remove_session(&self.table, request, &gateway, None).await {
            tracing::warn!(error = %e, "unregister without session");
        }
        Ok(Response::ok())
    }

    /// Issue an access token for the requested service
    ///
    /// The target is the request's service id, or the gateway itself when
    /// absent. Scopes come from the comma-separated `scope` parameter.
    async fn authorize(&self, request: &Request) -> Result<Response> {
        if !request
            .attribute
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("accessToken"))
        {
            return Ok(Response::error(
                ErrorCode::NotSupportProfile,
                format!("unsupported attribute: {}", request.path()),
            ));
        }

        let (service_id, plugin_id) = match request.service_id.as_deref().filter(|s| !s.is_empty()) {
            Some(service_id) => {
                let (plugin, _) = self.registry.resolve(service_id).await?;
                (service_id.to_string(), plugin.plugin_id)
            }
            None => (GATEWAY_PLUGIN_ID.to_string(), GATEWAY_PLUGIN_ID.to_string()),
        };

        let token = self
            .auth
            .authorize(&token_origin(request), &service_id, &plugin_id, &scopes(request))?;

        Ok(Response::ok()
            .with("accessToken", Value::from(token.token))
            .with("expiresAt", Value::from(token.expires_at.to_rfc3339())))
    }
}

/// Whether a profile is answered by the gateway when no service id is given
#[must_use]
pub fn is_builtin_profile(profile: &str) -> bool {
    [AVAILABILITY_PROFILE, SYSTEM_PROFILE, SERVICE_DISCOVERY_PROFILE]
        .iter()
        .any(|p| p.eq_ignore_ascii_case(profile))
}

fn is_ignored_auth_profile(profile: &str) -> bool {
    IGNORED_AUTH_PROFILES
        .iter()
        .any(|p| p.eq_ignore_ascii_case(profile))
}

fn token_origin(request: &Request) -> String {
    request
        .origin
        .as_deref()
        .filter(|o| !o.trim().is_empty())
        .map_or_else(|| ANONYMOUS_TOKEN_ORIGIN.to_string(), |o| o.trim().to_string())
}

fn scopes(request: &Request) -> Vec<String> {
    match request.params.get("scope") {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Rewrite the ids of an adapter's `services` list to their qualified form
fn qualify_services(plugin: &DevicePlugin, response: &Response) -> Vec<Value> {
    let Some(Value::Array(services)) = response.body.get("services") else {
        return Vec::new();
    };

    services
        .iter()
        .cloned()
        .map(|mut service| {
            if let Some(Value::String(id)) = service.get_mut("id") {
                *id = PluginRegistry::append_service_id(plugin, id);
            }
            service
        })
        .collect()
}
