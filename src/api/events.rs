//! Client event WebSocket
//!
//! Clients connect to `/ws/events?receiver=R` (or `receiverAddress=R`) and
//! receive every event whose session names `R` as its receiver address.
//! Disconnecting purges the receiver's sessions. A second socket for the same
//! receiver takes it over; only the current socket purges on disconnect.

use std::sync::Arc;

use async_trait::async_trait;
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
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{ApiState, WsSenders};
use crate::events::EventSink;
use crate::message::Event;
use crate::{Error, Result};

/// Outgoing message to a client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientOutgoing {
    /// Connection established
    Connected { receiver: String },
    /// Event delivery
    Event { event: Event },
    /// Error occurred
    Error { code: String, message: String },
    /// Pong response
    Pong,
}

/// Incoming message from a client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientIncoming {
    /// Keepalive ping
    Ping,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(alias = "receiverAddress")]
    receiver: String,
}

/// Event sink delivering to connected client sockets
#[derive(Clone)]
pub struct WsEventSink {
    senders: WsSenders,
}

impl WsEventSink {
    #[must_use]
    pub const fn new(senders: WsSenders) -> Self {
        Self { senders }
    }
}

#[async_trait]
impl EventSink for WsEventSink {
    async fn deliver(&self, receiver_address: &str, event: &Event) -> Result<()> {
        let senders = self.senders.read().await;
        let tx = senders
            .get(receiver_address)
            .ok_or_else(|| Error::Delivery(format!("receiver not connected: {receiver_address}")))?;

        tx.try_send(ClientOutgoing::Event {
            event: event.clone(),
        })
        .map_err(|e| Error::Delivery(e.to_string()))
    }
}

/// Build client event routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/events", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.receiver))
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, receiver: String) {
    let (mut sender, mut incoming) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ClientOutgoing>(64);

    let replaced = state
        .clients
        .write()
        .await
        .insert(receiver.clone(), tx.clone())
        .is_some();
    if replaced {
        tracing::warn!(receiver = %receiver, "receiver taken over by a new socket");
    }

    let connected = ClientOutgoing::Connected {
        receiver: receiver.clone(),
    };
    if tx.send(connected).await.is_err() {
        return;
    }
    tracing::info!(receiver = %receiver, "event receiver connected");

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg)
                && sender.send(Message::Text(text.into())).await.is_err()
            {
                break;
            }
        }
    });

    let reply = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = incoming.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientIncoming>(&text) {
                    Ok(ClientIncoming::Ping) => {
                        let _ = reply.send(ClientOutgoing::Pong).await;
                    }
                    Err(e) => {
                        let error = ClientOutgoing::Error {
                            code: "invalid_message".to_string(),
                            message: e.to_string(),
                        };
                        let _ = reply.send(error).await;
                    }
                },
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

    // Only the socket currently registered for the receiver cleans up
    let mut clients = state.clients.write().await;
    if clients
        .get(&receiver)
        .is_some_and(|current| current.same_channel(&tx))
    {
        clients.remove(&receiver);
        drop(clients);
        state.ctx.on_receiver_disconnected(&receiver).await;
    }

    tracing::info!(receiver = %receiver, "event receiver disconnected");
}
