//! HTTP API server for the device gateway

pub mod adapters;
pub mod events;
pub mod gateway;
pub mod health;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use events::{ClientOutgoing, WsEventSink};

use crate::Result;
use crate::context::BrokerContext;

/// Shared sender registry for connected event receivers, keyed by receiver address
pub type WsSenders = Arc<RwLock<HashMap<String, mpsc::Sender<ClientOutgoing>>>>;

/// Shared state for API handlers
pub struct ApiState {
    pub ctx: Arc<BrokerContext>,
    pub clients: WsSenders,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server over a context and the receiver registry its sink delivers to
    #[must_use]
    pub fn new(ctx: Arc<BrokerContext>, clients: WsSenders) -> Self {
        let port = ctx.config().port;
        Self {
            state: Arc::new(ApiState { ctx, clients }),
            port,
        }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let ws = events::router(Arc::clone(&self.state))
            .merge(adapters::router(Arc::clone(&self.state)));

        let router = Router::new()
            .merge(gateway::router(Arc::clone(&self.state)))
            .nest("/ws", ws)
            .merge(health::router(Arc::clone(&self.state)));

        // Origin policy is enforced per request by the router, not by CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
