//! Shared broker state
//!
//! One [`BrokerContext`] owns the registry, the security services, the
//! session table and the components built on them. It is constructed
//! explicitly and passed to whoever needs it.

use std::sync::Arc;

use crate::Result;
use crate::config::Config;
use crate::db::DbPool;
use crate::events::{EventBroker, EventSessionTable, EventSink};
use crate::message::{Request, Response};
use crate::plugins::{AdapterIndex, DevicePlugin, GATEWAY_PLUGIN_ID, PluginRegistry};
use crate::router::RequestRouter;
use crate::security::{AccessToken, LocalAuthorizationService, OriginValidator, Whitelist};

/// Everything a running gateway shares between requests and adapters
pub struct BrokerContext {
    config: Config,
    registry: Arc<PluginRegistry>,
    whitelist: Arc<Whitelist>,
    auth: LocalAuthorizationService,
    table: Arc<EventSessionTable>,
    broker: EventBroker,
    router: RequestRouter,
}

impl BrokerContext {
    /// Build a context over a store, delivering events to `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the whitelist cannot be loaded
    pub fn new(config: Config, pool: DbPool, sink: Arc<dyn EventSink>) -> Result<Self> {
        let registry = Arc::new(PluginRegistry::new());
        let whitelist = Arc::new(Whitelist::load(pool.clone())?);
        let validator = Arc::new(OriginValidator::new(
            config.require_origin,
            config.block_origin,
            &config.always_allowed,
            Arc::clone(&whitelist),
        ));
        let auth = LocalAuthorizationService::new(pool, config.token_ttl);
        let table = Arc::new(EventSessionTable::new());

        let broker = EventBroker::new(Arc::clone(&table), Arc::clone(&registry), sink);
        let router = RequestRouter::new(
            Arc::clone(&registry),
            validator,
            auth.clone(),
            Arc::clone(&table),
            config.local_oauth,
            config.adapter_timeout,
        );

        Ok(Self {
            config,
            registry,
            whitelist,
            auth,
            table,
            broker,
            router,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    #[must_use]
    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    #[must_use]
    pub const fn auth(&self) -> &LocalAuthorizationService {
        &self.auth
    }

    #[must_use]
    pub fn sessions(&self) -> &EventSessionTable {
        &self.table
    }

    #[must_use]
    pub const fn broker(&self) -> &EventBroker {
        &self.broker
    }

    /// Route a client request
    pub async fn route(&self, request: Request) -> Response {
        self.router.route(request).await
    }

    /// Rebuild the plugin set, cleaning up after plugins that disappeared
    ///
    /// # Errors
    ///
    /// Returns error if tokens of a removed plugin cannot be revoked
    pub async fn discover_plugins(&self, index: &dyn AdapterIndex) -> Result<Vec<DevicePlugin>> {
        let removed = self.registry.discover_plugins(index).await;
        for plugin in &removed {
            self.cancel_plugin(&plugin.plugin_id).await?;
        }
        Ok(removed)
    }

    /// Remove a plugin with its sessions and tokens
    ///
    /// Returns whether the plugin was registered. Calling it again for the
    /// same plugin has no further effect.
    ///
    /// # Errors
    ///
    /// Returns error if the plugin's tokens cannot be revoked
    pub async fn remove_plugin(&self, plugin_id: &str) -> Result<bool> {
        let removed = self.registry.remove(plugin_id).await.is_some();
        self.cancel_plugin(plugin_id).await?;
        if removed {
            tracing::info!(plugin_id, "plugin removed");
        }
        Ok(removed)
    }

    async fn cancel_plugin(&self, plugin_id: &str) -> Result<()> {
        let sessions = self.table.remove_for_plugin(plugin_id).await;
        let tokens = self.auth.revoke_for_plugin(plugin_id)?;
        let token_sessions = self.table.remove_for_tokens(&tokens).await;

        if sessions + token_sessions + tokens.len() > 0 {
            tracing::info!(
                plugin_id,
                sessions = sessions + token_sessions,
                tokens = tokens.len(),
                "plugin sessions and tokens cancelled"
            );
        }
        Ok(())
    }

    /// Drop all subscriptions of a receiver that went away
    pub async fn on_receiver_disconnected(&self, receiver: &str) -> usize {
        let removed = self.table.remove_for_receiver(receiver).await;
        if removed > 0 {
            tracing::info!(receiver, removed, "receiver sessions purged");
        }
        removed
    }

    /// Re-pair an origin with a service
    ///
    /// Sessions holding the previous token are moved to the new one.
    ///
    /// # Errors
    ///
    /// Returns error if the service is unknown or the store cannot be updated
    pub async fn reauthorize(
        &self,
        origin: &str,
        service_id: &str,
        scopes: &[String],
    ) -> Result<AccessToken> {
        let plugin_id = if service_id == GATEWAY_PLUGIN_ID {
            GATEWAY_PLUGIN_ID.to_string()
        } else {
            self.registry.resolve(service_id).await?.0.plugin_id
        };

        let (token, previous) = self
            .auth
            .reauthorize(origin, service_id, &plugin_id, scopes)?;
        if let Some(previous) = previous {
            self.table.replace_access_token(&previous, &token.token).await;
        }
        Ok(token)
    }

    /// Revoke one token and the sessions holding it
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be updated
    pub async fn revoke_token(&self, token: &str) -> Result<bool> {
        let revoked = self.auth.revoke(token)?;
        self.table.remove_for_tokens(&[token.to_string()]).await;
        Ok(revoked)
    }

    /// Revoke every token and the sessions holding them
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be updated
    pub async fn reset_authorizations(&self) -> Result<usize> {
        let tokens = self.auth.reset()?;
        let sessions = self.table.remove_for_tokens(&tokens).await;
        tracing::info!(tokens = tokens.len(), sessions, "authorizations reset");
        Ok(tokens.len())
    }

    /// Apply a token rotation reported by an adapter
    pub async fn update_access_token_for_plugin(&self, plugin_id: &str, token: &str) -> usize {
        let updated = self
            .table
            .update_access_token_for_plugin(plugin_id, token)
            .await;
        tracing::debug!(plugin_id, updated, "session tokens rotated");
        updated
    }
}
