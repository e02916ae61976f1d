//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use device_gateway::adapters::DeviceAdapter;
use device_gateway::events::EventSink;
use device_gateway::message::{Event, Request, Response};
use device_gateway::plugins::DevicePlugin;
use device_gateway::{BrokerContext, Config, Result, db};

/// Origin used by most tests
pub const ORIGIN: &str = "https://app.example.com";

/// Policy knobs for a test gateway
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub require_origin: bool,
    pub block_origin: bool,
    pub local_oauth: bool,
}

impl Policy {
    /// Origins required, whitelist off, tokens off
    pub const OPEN: Self = Self {
        require_origin: true,
        block_origin: false,
        local_oauth: false,
    };

    /// Origins required and whitelisted, tokens required
    pub const STRICT: Self = Self {
        require_origin: true,
        block_origin: true,
        local_oauth: true,
    };
}

/// Test config over an in-memory store
#[must_use]
pub fn test_config(policy: Policy) -> Config {
    Config {
        port: 0,
        data_dir: std::env::temp_dir(),
        require_origin: policy.require_origin,
        block_origin: policy.block_origin,
        local_oauth: policy.local_oauth,
        adapter_timeout: Duration::from_millis(200),
        plugin_dirs: Vec::new(),
        ..Config::default()
    }
}

/// A broker context plus the sink it delivers events to
pub struct TestGateway {
    pub ctx: Arc<BrokerContext>,
    pub sink: Arc<RecordingSink>,
}

impl TestGateway {
    /// Register a plugin with a connected mock adapter
    pub async fn add_plugin(&self, plugin: DevicePlugin) -> Arc<MockAdapter> {
        let adapter = Arc::new(MockAdapter::new(&plugin.plugin_id));
        let plugin_id = plugin.plugin_id.clone();
        self.ctx
            .registry()
            .register(plugin)
            .await
            .expect("failed to register plugin");
        self.ctx
            .registry()
            .attach_adapter(&plugin_id, adapter.clone())
            .await
            .expect("failed to attach adapter");
        adapter
    }
}

/// Build a test gateway with the given policy
#[must_use]
pub fn gateway(policy: Policy) -> TestGateway {
    let pool = db::init_memory().expect("failed to init test db");
    let sink = Arc::new(RecordingSink::default());
    let ctx = BrokerContext::new(test_config(policy), pool, sink.clone())
        .expect("failed to build context");
    TestGateway {
        ctx: Arc::new(ctx),
        sink,
    }
}

/// Adapter that records requests and answers with a canned response
pub struct MockAdapter {
    plugin_id: String,
    requests: Mutex<Vec<Request>>,
    response: Mutex<Response>,
    delay: Mutex<Option<Duration>>,
}

impl MockAdapter {
    #[must_use]
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            requests: Mutex::new(Vec::new()),
            response: Mutex::new(Response::ok()),
            delay: Mutex::new(None),
        }
    }

    /// Answer every following request with `response`
    pub fn respond_with(&self, response: Response) {
        *self.response.lock().unwrap() = response;
    }

    /// Sleep before answering
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceAdapter for MockAdapter {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    async fn invoke(&self, request: Request) -> Result<Response> {
        self.requests.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.response.lock().unwrap().clone();
        Ok(response)
    }
}

/// Sink that keeps every delivered event
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(String, Event)>>,
}

impl RecordingSink {
    /// Delivered (receiver, event) pairs
    pub fn delivered(&self) -> Vec<(String, Event)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.delivered.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, receiver_address: &str, event: &Event) -> Result<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((receiver_address.to_string(), event.clone()));
        Ok(())
    }
}
