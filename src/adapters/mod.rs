//! Device adapter boundary
//!
//! The gateway never talks to hardware itself. Each plugin is backed by an
//! adapter that answers forwarded requests; adapters connected over the
//! WebSocket endpoint are represented by [`RemoteAdapter`].

mod remote;

use async_trait::async_trait;

pub use remote::{AdapterToGateway, GatewayToAdapter, RemoteAdapter};

use crate::Result;
use crate::message::{Request, Response};

/// Capability every device adapter provides
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Plugin this adapter serves
    fn plugin_id(&self) -> &str;

    /// Handle a forwarded request
    ///
    /// The request carries the raw service id, the caller's access token and,
    /// for legacy adapters, the derived session key. Callers bound the wait.
    async fn invoke(&self, request: Request) -> Result<Response>;
}
