//! Adapter WebSocket endpoint
//!
//! Adapters connect to `/ws/adapter?plugin_id=P` for a plugin the registry
//! already knows and that has no adapter connected yet. The gateway sends
//! `invoke` frames and expects `response` frames back; adapters push `event`
//! and `token_rotated` frames at will.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::ApiState;
use crate::Error;
use crate::adapters::{AdapterToGateway, DeviceAdapter, GatewayToAdapter, RemoteAdapter};

/// Query parameters for adapter WebSocket connection
#[derive(Debug, Deserialize)]
struct AdapterWsQuery {
    plugin_id: String,
}

/// Build adapter WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/adapter", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AdapterWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_adapter_socket(socket, state, query.plugin_id))
}

async fn handle_adapter_socket(socket: WebSocket, state: Arc<ApiState>, plugin_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<GatewayToAdapter>(32);
    let adapter = Arc::new(RemoteAdapter::new(&plugin_id, tx.clone()));
    let attached: Arc<dyn DeviceAdapter> = adapter.clone();

    // Unknown plugins and plugins with a live adapter are refused
    if let Err(e) = state
        .ctx
        .registry()
        .attach_adapter(&plugin_id, Arc::clone(&attached))
        .await
    {
        tracing::warn!(plugin_id = %plugin_id, error = %e, "adapter connection refused");
        let code = match &e {
            Error::PluginNotFound(_) => "plugin_not_found",
            _ => "already_connected",
        };
        let err = GatewayToAdapter::Error {
            code: code.to_string(),
            message: e.to_string(),
        };
        if let Ok(json) = serde_json::to_string(&err) {
            let _ = sender.send(Message::Text(json.into())).await;
        }
        return;
    }

    let ack = GatewayToAdapter::Registered {
        plugin_id: plugin_id.clone(),
    };
    if tx.send(ack).await.is_err() {
        return;
    }
    drop(tx);

    // Spawn task to forward frames from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&frame)
                && sender.send(Message::Text(text.into())).await.is_err()
            {
                break;
            }
        }
    });

    let recv_state = Arc::clone(&state);
    let recv_adapter = Arc::clone(&adapter);
    let recv_plugin = plugin_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let frame = match serde_json::from_str::<AdapterToGateway>(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(plugin_id = %recv_plugin, error = %e, "invalid adapter frame");
                            continue;
                        }
                    };
                    handle_frame(&recv_state, &recv_adapter, &recv_plugin, frame).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Cleanup on disconnect
    adapter.close();
    state
        .ctx
        .registry()
        .detach_if_current(&plugin_id, &attached)
        .await;
    tracing::info!(plugin_id = %plugin_id, "adapter disconnected");
}

async fn handle_frame(
    state: &ApiState,
    adapter: &RemoteAdapter,
    plugin_id: &str,
    frame: AdapterToGateway,
) {
    match frame {
        AdapterToGateway::Response {
            correlation_id,
            response,
        } => {
            if !adapter.handle_response(&correlation_id, response) {
                tracing::warn!(
                    plugin_id,
                    correlation_id = %correlation_id,
                    "no pending invocation for correlation ID"
                );
            }
        }
        AdapterToGateway::Event { event } => {
            let delivered = state.ctx.broker().on_event_from(plugin_id, event).await;
            tracing::trace!(plugin_id, receivers = delivered.len(), "adapter event handled");
        }
        AdapterToGateway::TokenRotated { access_token } => {
            state
                .ctx
                .update_access_token_for_plugin(plugin_id, &access_token)
                .await;
        }
        AdapterToGateway::Ping => {}
    }
}
