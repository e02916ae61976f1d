//! Adapter reached over a WebSocket connection

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::DeviceAdapter;
use crate::message::{Event, Request, Response};
use crate::{Error, Result};

/// Outgoing frame from gateway to adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayToAdapter {
    /// Connection accepted
    Registered { plugin_id: String },
    /// Forwarded request awaiting a `response` frame
    Invoke {
        correlation_id: String,
        request: Request,
    },
    /// Error message
    Error { code: String, message: String },
}

/// Incoming frame from adapter to gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterToGateway {
    /// Answer to an invoke frame
    Response {
        correlation_id: String,
        response: Response,
    },
    /// Asynchronous notification
    Event { event: Event },
    /// The adapter rotated the token it uses for its sessions
    TokenRotated { access_token: String },
    /// Keepalive ping
    Ping,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

/// Adapter whose requests travel as frames over a channel to a socket writer
pub struct RemoteAdapter {
    plugin_id: String,
    outbound: mpsc::Sender<GatewayToAdapter>,
    /// Pending invocation responses keyed by correlation ID
    pending: PendingMap,
}

impl RemoteAdapter {
    #[must_use]
    pub fn new(plugin_id: &str, outbound: mpsc::Sender<GatewayToAdapter>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle a response frame for a pending invocation
    ///
    /// Returns true if the correlation ID was found and resolved
    pub fn handle_response(&self, correlation_id: &str, response: Response) -> bool {
        let tx = lock(&self.pending).remove(correlation_id);
        tx.is_some_and(|tx| tx.send(response).is_ok())
    }

    /// Fail every pending invocation
    pub fn close(&self) {
        let dropped = {
            let mut pending = lock(&self.pending);
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!(plugin_id = %self.plugin_id, dropped, "pending invocations abandoned");
        }
    }

    /// Number of invocations awaiting a response
    #[must_use]
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[async_trait]
impl DeviceAdapter for RemoteAdapter {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    async fn invoke(&self, request: Request) -> Result<Response> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(correlation_id.clone(), tx);

        // Removes the entry if the caller gives up before the adapter answers
        let _guard = PendingGuard {
            pending: &self.pending,
            correlation_id: &correlation_id,
        };

        let frame = GatewayToAdapter::Invoke {
            correlation_id: correlation_id.clone(),
            request,
        };
        if self.outbound.send(frame).await.is_err() {
            return Err(Error::adapter(&self.plugin_id, "adapter disconnected"));
        }

        rx.await
            .map_err(|_| Error::adapter(&self.plugin_id, "adapter disconnected"))
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingMap,
    correlation_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(self.correlation_id);
    }
}

fn lock(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Response>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn invoke_round_trip() {
        let (tx, mut rx) = mpsc::channel(8);
        let adapter = Arc::new(RemoteAdapter::new("cam1", tx));

        let remote = Arc::clone(&adapter);
        let answer = tokio::spawn(async move {
            let Some(GatewayToAdapter::Invoke {
                correlation_id,
                request,
            }) = rx.recv().await
            else {
                panic!("expected invoke frame");
            };
            assert_eq!(request.profile.as_deref(), Some("camera"));
            remote.handle_response(&correlation_id, Response::ok())
        });

        let response = adapter.invoke(Request::new(crate::message::Action::Invoke, "camera")).await.unwrap();
        assert!(response.is_ok());
        assert!(answer.await.unwrap());
        assert_eq!(adapter.pending_len(), 0);
    }

    #[tokio::test]
    async fn cancelled_invoke_clears_pending() {
        let (tx, _rx) = mpsc::channel(8);
        let adapter = RemoteAdapter::new("cam1", tx);

        let request = Request::new(crate::message::Action::Invoke, "camera");
        let result = tokio::time::timeout(Duration::from_millis(20), adapter.invoke(request)).await;

        assert!(result.is_err());
        assert_eq!(adapter.pending_len(), 0);
    }

    #[tokio::test]
    async fn closed_channel_is_adapter_error() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let adapter = RemoteAdapter::new("cam1", tx);

        let err = adapter
            .invoke(Request::new(crate::message::Action::Invoke, "camera"))
            .await
            .unwrap_err();
        assert_eq!(err.plugin_id(), Some("cam1"));
    }

    #[tokio::test]
    async fn close_fails_waiters() {
        let (tx, mut rx) = mpsc::channel(8);
        let adapter = Arc::new(RemoteAdapter::new("cam1", tx));

        let waiting = Arc::clone(&adapter);
        let call = tokio::spawn(async move {
            waiting
                .invoke(Request::new(crate::message::Action::Invoke, "camera"))
                .await
        });

        assert!(rx.recv().await.is_some());
        adapter.close();
        assert!(call.await.unwrap().is_err());
    }

    #[test]
    fn unknown_correlation_id() {
        let (tx, _rx) = mpsc::channel(1);
        let adapter = RemoteAdapter::new("cam1", tx);
        assert!(!adapter.handle_response("nope", Response::ok()));
    }
}
