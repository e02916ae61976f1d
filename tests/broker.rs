//! Broker integration tests
//!
//! Requests go through `BrokerContext::route` against mock adapters; events
//! go through the broker into a recording sink.

use std::sync::Arc;
use std::time::Duration;

use device_gateway::message::{Action, ErrorCode, Event, Request, Response};
use device_gateway::plugins::{DevicePlugin, PluginRegistry};
use serde_json::Value;
use tokio_test::{assert_err, assert_ok};

mod common;
use common::{ORIGIN, Policy, gateway};

fn subscribe(action: Action, origin: &str, service_id: &str, attribute: &str) -> Request {
    Request::new(action, "camera")
        .with_origin(origin)
        .with_service_id(service_id)
        .with_attribute(attribute)
        .with_receiver("R1")
}

async fn issue_token(gw: &common::TestGateway, origin: &str, service_id: &str) -> String {
    let response = gw
        .ctx
        .route(
            Request::new(Action::Invoke, "authorization")
                .with_attribute("accessToken")
                .with_origin(origin)
                .with_service_id(service_id),
        )
        .await;
    assert!(response.is_ok(), "authorization failed: {response:?}");
    response.body["accessToken"]
        .as_str()
        .expect("token in response")
        .to_string()
}

#[tokio::test]
async fn qualified_ids_resolve_back() {
    let registry = PluginRegistry::new();
    for id in ["cam1", "hue-bridge", "legacy_io"] {
        registry.register(DevicePlugin::new(id)).await.unwrap();
    }

    for id in ["cam1", "hue-bridge", "legacy_io"] {
        let plugin = registry.get(id).await.unwrap();
        for raw in ["001", "", "bridge:light:3", "a.b@c"] {
            let qualified = PluginRegistry::append_service_id(&plugin, raw);
            let (resolved, raw_id) = registry.resolve(&qualified).await.unwrap();
            assert_eq!(resolved.plugin_id, id);
            assert_eq!(raw_id, raw);
        }
    }
}

#[tokio::test]
async fn same_raw_id_on_two_plugins() {
    let gw = gateway(Policy::OPEN);
    let a = gw.add_plugin(DevicePlugin::new("pluginA")).await;
    let b = gw.add_plugin(DevicePlugin::new("pluginB")).await;
    a.respond_with(Response::ok().with("from", Value::from("A")));
    b.respond_with(Response::ok().with("from", Value::from("B")));

    let registry = gw.ctx.registry();
    let (plugin_a, raw_a) = registry.resolve("001:pluginA").await.unwrap();
    let (plugin_b, raw_b) = registry.resolve("001:pluginB").await.unwrap();
    assert_eq!(plugin_a.plugin_id, "pluginA");
    assert_eq!(plugin_b.plugin_id, "pluginB");
    assert_eq!(raw_a, "001");
    assert_eq!(raw_b, "001");

    let response = gw
        .ctx
        .route(
            Request::new(Action::Invoke, "battery")
                .with_attribute("level")
                .with_origin(ORIGIN)
                .with_service_id("001:pluginB"),
        )
        .await;
    assert_eq!(response.body["from"], "B");
    assert_eq!(response.plugin_id.as_deref(), Some("pluginB"));
    assert!(a.requests().is_empty());
    assert_eq!(b.requests()[0].service_id.as_deref(), Some("001"));
}

#[tokio::test]
async fn unknown_origin_is_rejected_before_any_adapter() {
    let gw = gateway(Policy::STRICT);
    let adapter = gw.add_plugin(DevicePlugin::new("cam1")).await;

    for origin in ["https://evil.example.com", "http://app.example.com", "chrome-extension://abc"] {
        let response = gw
            .ctx
            .route(subscribe(Action::Invoke, origin, "001:cam1", "takePhoto"))
            .await;
        assert_eq!(response.error_code, Some(ErrorCode::OriginNotAllowed), "{origin}");
    }

    let missing = gw
        .ctx
        .route(Request::new(Action::Invoke, "camera").with_service_id("001:cam1"))
        .await;
    assert_eq!(missing.error_code, Some(ErrorCode::OriginNotSpecified));

    let doubled = gw
        .ctx
        .route(subscribe(Action::Invoke, "https://a.com https://b.com", "001:cam1", "takePhoto"))
        .await;
    assert_eq!(doubled.error_code, Some(ErrorCode::OriginNotUnique));

    assert!(adapter.requests().is_empty());
}

#[tokio::test]
async fn whitelisted_origin_passes() {
    let gw = gateway(Policy::STRICT);
    gw.ctx.whitelist().add(ORIGIN, "App").await.unwrap();

    let response = gw
        .ctx
        .route(Request::new(Action::Invoke, "availability").with_origin(ORIGIN))
        .await;
    assert!(response.is_ok());

    // Explicit default port is the same origin
    let response = gw
        .ctx
        .route(Request::new(Action::Invoke, "availability").with_origin("https://app.example.com:443"))
        .await;
    assert!(response.is_ok());
}

#[tokio::test]
async fn always_allowed_origin_ignores_whitelist() {
    for policy in [Policy::STRICT, Policy::OPEN] {
        let gw = gateway(policy);
        let response = gw
            .ctx
            .route(Request::new(Action::Invoke, "availability").with_origin("file://"))
            .await;
        assert!(response.is_ok());
    }
}

#[tokio::test]
async fn register_then_unregister_restores_table() {
    let gw = gateway(Policy::OPEN);
    gw.add_plugin(DevicePlugin::new("cam1")).await;
    gw.add_plugin(DevicePlugin::new("light")).await;

    let existing = Request::new(Action::Register, "light")
        .with_origin("https://other.example.com")
        .with_service_id("7:light")
        .with_attribute("onChange")
        .with_receiver("R9");
    assert!(gw.ctx.route(existing).await.is_ok());
    let before = gw.ctx.sessions().all().await;

    let response = gw
        .ctx
        .route(subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto"))
        .await;
    assert!(response.is_ok());
    assert_eq!(gw.ctx.sessions().len().await, before.len() + 1);

    // Same key in different case is a duplicate
    let response = gw
        .ctx
        .route(subscribe(Action::Register, ORIGIN, "001:cam1", "ONPHOTO"))
        .await;
    assert!(response.is_ok());
    assert_eq!(gw.ctx.sessions().len().await, before.len() + 1);

    let response = gw
        .ctx
        .route(subscribe(Action::Unregister, ORIGIN, "001:cam1", "onPhoto"))
        .await;
    assert!(response.is_ok());
    assert_eq!(gw.ctx.sessions().all().await, before);
}

#[tokio::test]
async fn failed_registration_leaves_no_session() {
    let gw = gateway(Policy::OPEN);
    let adapter = gw.add_plugin(DevicePlugin::new("cam1")).await;

    adapter.respond_with(Response::error(ErrorCode::Plugin, "lens cap on"));
    let response = gw
        .ctx
        .route(subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto"))
        .await;
    assert_eq!(response.error_code, Some(ErrorCode::Plugin));
    assert_eq!(response.error_message.as_deref(), Some("lens cap on"));
    assert_eq!(response.plugin_id.as_deref(), Some("cam1"));
    assert!(gw.ctx.sessions().is_empty().await);

    adapter.respond_with(Response::ok());
    adapter.delay(Duration::from_secs(2));
    let response = gw
        .ctx
        .route(subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto"))
        .await;
    assert_eq!(response.error_code, Some(ErrorCode::Timeout));
    assert_eq!(response.plugin_id.as_deref(), Some("cam1"));
    assert!(gw.ctx.sessions().is_empty().await);
}

#[tokio::test]
async fn unknown_plugin_and_missing_adapter() {
    let gw = gateway(Policy::OPEN);

    let response = gw
        .ctx
        .route(subscribe(Action::Invoke, ORIGIN, "001:ghost", "takePhoto"))
        .await;
    assert_eq!(response.error_code, Some(ErrorCode::PluginNotFound));

    gw.ctx.registry().register(DevicePlugin::new("cam1")).await.unwrap();
    let response = gw
        .ctx
        .route(subscribe(Action::Invoke, ORIGIN, "001:cam1", "takePhoto"))
        .await;
    assert_eq!(response.error_code, Some(ErrorCode::Plugin));

    let response = gw
        .ctx
        .route(Request::new(Action::Invoke, "camera").with_origin(ORIGIN))
        .await;
    assert_eq!(response.error_code, Some(ErrorCode::MalformedRequest));
}

#[tokio::test]
async fn unregister_without_session_still_answers() {
    let gw = gateway(Policy::OPEN);
    let adapter = gw.add_plugin(DevicePlugin::new("cam1")).await;

    let response = gw
        .ctx
        .route(subscribe(Action::Unregister, ORIGIN, "001:cam1", "onPhoto"))
        .await;
    assert!(response.is_ok());
    assert_eq!(adapter.requests().len(), 1);
}

#[tokio::test]
async fn token_events_match_exactly_and_case_insensitively() {
    let gw = gateway(Policy::OPEN);
    gw.add_plugin(DevicePlugin::new("cam1")).await;

    let request = subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto").with_access_token("tok-1");
    assert!(gw.ctx.route(request).await.is_ok());

    let event = |token: &str, profile: &str, attribute: &str| Event {
        service_id: Some("001".to_string()),
        access_token: Some(token.to_string()),
        ..Event::new(profile, attribute)
    };

    assert!(gw.ctx.broker().on_event(event("TOK-1", "camera", "onPhoto")).await.is_empty());
    assert!(gw.ctx.broker().on_event(event("tok-1", "camera", "onZoom")).await.is_empty());
    assert!(
        gw.ctx
            .broker()
            .on_event(Event {
                interface: Some("front".to_string()),
                ..event("tok-1", "camera", "onPhoto")
            })
            .await
            .is_empty()
    );

    let delivered = gw.ctx.broker().on_event(event("tok-1", "CAMERA", "onphoto")).await;
    assert_eq!(delivered, vec!["R1".to_string()]);

    let (receiver, sent) = &gw.sink.delivered()[0];
    assert_eq!(receiver, "R1");
    assert_eq!(sent.service_id.as_deref(), Some("001:cam1"));
    assert_eq!(sent.receiver_address.as_deref(), Some("R1"));
    assert_eq!(sent.access_token.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn camera_subscription_lifecycle() {
    let origin = "https://app.example.com:443";
    let gw = gateway(Policy::STRICT);
    gw.ctx.whitelist().add(ORIGIN, "App").await.unwrap();
    let adapter = gw.add_plugin(DevicePlugin::new("cam1")).await;

    // Device profiles need a token
    let response = gw
        .ctx
        .route(subscribe(Action::Register, origin, "001:cam1", "onPhoto"))
        .await;
    assert_eq!(response.error_code, Some(ErrorCode::Permission));
    assert!(adapter.requests().is_empty());

    let token = issue_token(&gw, origin, "001:cam1").await;
    let response = gw
        .ctx
        .route(subscribe(Action::Register, origin, "001:cam1", "onPhoto").with_access_token(&token))
        .await;
    assert!(response.is_ok(), "{response:?}");

    let sessions = gw.ctx.sessions().all().await;
    assert_eq!(sessions.len(), 1);
    let s1 = &sessions[0];
    assert_eq!(s1.plugin_id, "cam1");
    assert_eq!(s1.receiver_address, "R1");
    assert_eq!(s1.access_token.as_deref(), Some(token.as_str()));

    let photo = Event {
        service_id: Some("001".to_string()),
        access_token: Some(token.clone()),
        ..Event::new("Camera", "ONPHOTO")
    };
    let delivered = gw.ctx.broker().on_event_from("cam1", photo.clone()).await;
    assert_eq!(delivered, vec!["R1".to_string()]);

    let response = gw
        .ctx
        .route(subscribe(Action::Unregister, origin, "001:cam1", "onPhoto").with_access_token(&token))
        .await;
    assert!(response.is_ok());
    assert!(gw.ctx.sessions().is_empty().await);

    assert!(gw.ctx.broker().on_event_from("cam1", photo).await.is_empty());
    assert_eq!(gw.sink.delivered().len(), 1);
}

#[tokio::test]
async fn removing_a_plugin_leaves_others_alone() {
    let gw = gateway(Policy::STRICT);
    gw.ctx.whitelist().add(ORIGIN, "App").await.unwrap();
    gw.add_plugin(DevicePlugin::new("cam1")).await;
    gw.add_plugin(DevicePlugin::new("light")).await;

    let cam_token = issue_token(&gw, ORIGIN, "001:cam1").await;
    let light_token = issue_token(&gw, ORIGIN, "7:light").await;

    let cam = subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto").with_access_token(&cam_token);
    let light = Request::new(Action::Register, "light")
        .with_origin(ORIGIN)
        .with_service_id("7:light")
        .with_attribute("onChange")
        .with_receiver("R2")
        .with_access_token(&light_token);
    assert!(gw.ctx.route(cam).await.is_ok());
    assert!(gw.ctx.route(light).await.is_ok());
    let light_sessions: Vec<_> = gw
        .ctx
        .sessions()
        .find(|s| s.plugin_id == "light")
        .await;

    assert!(assert_ok!(gw.ctx.remove_plugin("cam1").await));
    assert_eq!(gw.ctx.sessions().all().await, light_sessions);
    assert!(gw.ctx.auth().get_access_token(ORIGIN, "001:cam1").unwrap().is_none());
    assert!(gw.ctx.auth().get_access_token(ORIGIN, "7:light").unwrap().is_some());

    // Second removal changes nothing
    assert!(!assert_ok!(gw.ctx.remove_plugin("cam1").await));
    assert_eq!(gw.ctx.sessions().all().await, light_sessions);

    // The revoked token no longer opens anything
    let response = gw
        .ctx
        .route(subscribe(Action::Invoke, ORIGIN, "001:cam1", "takePhoto").with_access_token(&cam_token))
        .await;
    assert_eq!(response.error_code, Some(ErrorCode::Permission));
}

#[tokio::test]
async fn legacy_plugins_get_a_session_key() {
    let gw = gateway(Policy::OPEN);
    let adapter = gw
        .add_plugin(DevicePlugin::new("oldcam").with_sdk_version("1.0.2"))
        .await;

    let response = gw
        .ctx
        .route(subscribe(Action::Register, ORIGIN, "001:oldcam", "onPhoto"))
        .await;
    assert!(response.is_ok());

    let forwarded = &adapter.requests()[0];
    // Receiver ids carry the origin's default port
    let expected_key = format!("{ORIGIN}:443.oldcam");
    assert_eq!(forwarded.session_key.as_deref(), Some(expected_key.as_str()));
    assert_eq!(forwarded.service_id.as_deref(), Some("001"));

    // Tokenless event addressed by session key
    let event = Event {
        service_id: Some("001".to_string()),
        session_key: Some(format!("{expected_key}@photo")),
        ..Event::new("camera", "onPhoto")
    };
    let delivered = gw.ctx.broker().on_event(event).await;
    assert_eq!(delivered, vec!["R1".to_string()]);
}

#[tokio::test]
async fn receiver_disconnect_purges_its_sessions() {
    let gw = gateway(Policy::OPEN);
    gw.add_plugin(DevicePlugin::new("cam1")).await;

    assert!(
        gw.ctx
            .route(subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto"))
            .await
            .is_ok()
    );
    assert!(
        gw.ctx
            .route(subscribe(Action::Register, ORIGIN, "001:cam1", "onZoom"))
            .await
            .is_ok()
    );

    assert_eq!(gw.ctx.on_receiver_disconnected("R1").await, 2);
    assert!(gw.ctx.sessions().is_empty().await);
}

#[tokio::test]
async fn service_change_reaches_discovery_subscribers() {
    let gw = gateway(Policy::OPEN);
    gw.add_plugin(DevicePlugin::new("cam1")).await;

    let register = Request::new(Action::Register, "serviceDiscovery")
        .with_origin(ORIGIN)
        .with_attribute("onServiceChange")
        .with_receiver("R5");
    assert!(gw.ctx.route(register).await.is_ok());

    let mut event = Event::new("serviceDiscovery", "onServiceChange");
    event.body.insert(
        "networkService".to_string(),
        serde_json::json!({"id": "001", "state": true}),
    );
    let delivered = gw.ctx.broker().on_event_from("cam1", event).await;
    assert_eq!(delivered, vec!["R5".to_string()]);

    let (_, sent) = &gw.sink.delivered()[0];
    assert_eq!(sent.body["networkService"]["id"], "001:cam1");
    assert_eq!(sent.service_id, None);
}

#[tokio::test]
async fn service_discovery_qualifies_adapter_services() {
    let gw = gateway(Policy::OPEN);
    let a = gw.add_plugin(DevicePlugin::new("pluginA")).await;
    let b = gw.add_plugin(DevicePlugin::new("pluginB")).await;
    for adapter in [&a, &b] {
        adapter.respond_with(
            Response::ok().with("services", serde_json::json!([{"id": "001", "name": "Device"}])),
        );
    }

    let response = gw
        .ctx
        .route(Request::new(Action::Invoke, "serviceDiscovery").with_origin(ORIGIN))
        .await;
    assert!(response.is_ok());

    let mut ids: Vec<_> = response.body["services"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["001:pluginA", "001:pluginB"]);
}

#[tokio::test]
async fn reauthorize_moves_sessions_to_new_token() {
    let gw = gateway(Policy::STRICT);
    gw.ctx.whitelist().add(ORIGIN, "App").await.unwrap();
    gw.add_plugin(DevicePlugin::new("cam1")).await;

    let old = issue_token(&gw, ORIGIN, "001:cam1").await;
    let request = subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto").with_access_token(&old);
    assert!(gw.ctx.route(request).await.is_ok());

    assert_err!(gw.ctx.reauthorize(ORIGIN, "001:ghost", &[]).await);
    let new = assert_ok!(gw.ctx.reauthorize(ORIGIN, "001:cam1", &[]).await);
    assert_ne!(new.token, old);

    let sessions = gw.ctx.sessions().all().await;
    assert_eq!(sessions[0].access_token.as_deref(), Some(new.token.as_str()));

    assert!(gw.ctx.revoke_token(&new.token).await.unwrap());
    assert!(gw.ctx.sessions().is_empty().await);
}

#[tokio::test]
async fn plugin_removed_during_registration_leaves_no_session() {
    let gw = gateway(Policy::OPEN);
    let adapter = gw.add_plugin(DevicePlugin::new("cam1")).await;
    adapter.delay(Duration::from_millis(100));

    let ctx = Arc::clone(&gw.ctx);
    let register = tokio::spawn(async move {
        ctx.route(subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto"))
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(adapter.requests().len(), 1);
    assert!(assert_ok!(gw.ctx.remove_plugin("cam1").await));

    let response = register.await.unwrap();
    assert_eq!(response.error_code, Some(ErrorCode::PluginNotFound));
    assert!(gw.ctx.sessions().is_empty().await);
}

#[tokio::test]
async fn default_port_origin_shares_token_and_receiver() {
    let explicit = "https://app.example.com:443";
    let gw = gateway(Policy::STRICT);
    gw.ctx.whitelist().add(ORIGIN, "App").await.unwrap();
    let adapter = gw.add_plugin(DevicePlugin::new("cam1")).await;

    let token = issue_token(&gw, ORIGIN, "001:cam1").await;
    let response = gw
        .ctx
        .route(subscribe(Action::Invoke, explicit, "001:cam1", "takePhoto").with_access_token(&token))
        .await;
    assert!(response.is_ok(), "{response:?}");
    assert_eq!(issue_token(&gw, explicit, "001:cam1").await, token);

    for origin in [ORIGIN, explicit] {
        let request = Request::new(Action::Register, "camera")
            .with_origin(origin)
            .with_service_id("001:cam1")
            .with_attribute("onPhoto")
            .with_access_token(&token);
        assert!(gw.ctx.route(request).await.is_ok());
    }

    // Both spellings name one receiver; events go to the origin first sent
    let sessions = gw.ctx.sessions().all().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].receiver_address, ORIGIN);
    assert_eq!(adapter.requests().len(), 3);
}

#[tokio::test]
async fn rotated_token_keeps_events_flowing() {
    let gw = gateway(Policy::OPEN);
    gw.add_plugin(DevicePlugin::new("cam1")).await;
    gw.add_plugin(DevicePlugin::new("light")).await;

    let cam = subscribe(Action::Register, ORIGIN, "001:cam1", "onPhoto").with_access_token("tok-1");
    let light = Request::new(Action::Register, "light")
        .with_origin(ORIGIN)
        .with_service_id("7:light")
        .with_attribute("onChange")
        .with_receiver("R2")
        .with_access_token("tok-light");
    assert!(gw.ctx.route(cam).await.is_ok());
    assert!(gw.ctx.route(light).await.is_ok());

    assert_eq!(gw.ctx.update_access_token_for_plugin("cam1", "tok-2").await, 1);

    let photo = |token: &str| Event {
        service_id: Some("001".to_string()),
        access_token: Some(token.to_string()),
        ..Event::new("camera", "onPhoto")
    };
    assert!(gw.ctx.broker().on_event_from("cam1", photo("tok-1")).await.is_empty());
    assert_eq!(
        gw.ctx.broker().on_event_from("cam1", photo("tok-2")).await,
        vec!["R1".to_string()]
    );
    assert_eq!(gw.sink.delivered()[0].1.access_token.as_deref(), Some("tok-2"));

    let light_sessions = gw.ctx.sessions().find(|s| s.plugin_id == "light").await;
    assert_eq!(light_sessions[0].access_token.as_deref(), Some("tok-light"));
}

#[tokio::test]
async fn service_change_owner_found_by_session_key() {
    let gw = gateway(Policy::OPEN);
    gw.add_plugin(DevicePlugin::new("oldcam").with_sdk_version("1.0.0"))
        .await;

    let register = Request::new(Action::Register, "serviceDiscovery")
        .with_origin(ORIGIN)
        .with_attribute("onServiceChange")
        .with_receiver("R5");
    assert!(gw.ctx.route(register).await.is_ok());

    // No source plugin and no token: only the session key names the owner
    let mut event = Event::new("serviceDiscovery", "onServiceChange");
    event.session_key = Some("R9.oldcam@main".to_string());
    event.body.insert(
        "networkService".to_string(),
        serde_json::json!({"id": "002", "state": false}),
    );
    let delivered = gw.ctx.broker().on_event(event).await;
    assert_eq!(delivered, vec!["R5".to_string()]);

    let (_, sent) = &gw.sink.delivered()[0];
    assert_eq!(sent.body["networkService"]["id"], "002:oldcam");

    // An unknown owner is dropped
    let mut event = Event::new("serviceDiscovery", "onServiceChange");
    event.session_key = Some("R9.ghost".to_string());
    assert!(gw.ctx.broker().on_event(event).await.is_empty());
}

#[tokio::test]
async fn system_reports_plugin_metadata() {
    let gw = gateway(Policy::OPEN);
    let mut plugin = DevicePlugin::new("cam1").with_sdk_version("2.1.0");
    plugin.service_id_prefix = "cam-".to_string();
    gw.add_plugin(plugin).await;
    gw.ctx.registry().register(DevicePlugin::new("light")).await.unwrap();

    let response = gw
        .ctx
        .route(Request::new(Action::Invoke, "system").with_origin(ORIGIN))
        .await;
    assert!(response.is_ok());

    let plugins = response.body["plugins"].as_array().unwrap();
    assert_eq!(plugins.len(), 2);
    assert_eq!(plugins[0]["id"], "cam1");
    assert_eq!(plugins[0]["serviceIdPrefix"], "cam-");
    assert_eq!(plugins[0]["sdkVersion"], "2.1.0");
    assert_eq!(plugins[0]["connected"], true);
    assert_eq!(plugins[1]["id"], "light");
    assert_eq!(plugins[1]["connected"], false);
}
