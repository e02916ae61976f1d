//! Health check endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub plugins: usize,
    pub connected_adapters: usize,
    pub sessions: usize,
    pub receivers: usize,
}

/// Liveness probe with broker counters
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let registry = state.ctx.registry();
    let plugins = registry.list().await;

    let mut connected_adapters = 0;
    for plugin in &plugins {
        if registry.adapter(&plugin.plugin_id).await.is_some() {
            connected_adapters += 1;
        }
    }

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        plugins: plugins.len(),
        connected_adapters,
        sessions: state.ctx.sessions().len().await,
        receivers: state.clients.read().await.len(),
    })
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}
