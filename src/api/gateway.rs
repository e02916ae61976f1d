//! REST-style request endpoint
//!
//! `ANY /gotapi/{profile}[/{interface}]/{attribute}` turns an HTTP request
//! into a broker [`Request`]. PUT and DELETE on an `on...` attribute register
//! and unregister event subscriptions; everything else is a one-shot invoke.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method as HttpMethod, StatusCode, header},
    routing::any,
};
use serde_json::Value;

use super::ApiState;
use crate::message::{Action, ErrorCode, Method, Request, Response};

/// Build gateway routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/gotapi/{*path}", any(gotapi))
        .with_state(state)
}

async fn gotapi(
    State(state): State<Arc<ApiState>>,
    method: HttpMethod,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Response>) {
    let response = match build_request(&method, &path, query, &headers, &body) {
        Ok(request) => state.ctx.route(request).await,
        Err(response) => response,
    };
    (status_for(&response), Json(response))
}

/// Translate an HTTP request into a broker request
fn build_request(
    method: &HttpMethod,
    path: &str,
    mut query: HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Request, Response> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let (profile, interface, attribute) = match segments.as_slice() {
        [profile] => (*profile, None, None),
        [profile, attribute] => (*profile, None, Some(*attribute)),
        [profile, interface, attribute] => (*profile, Some(*interface), Some(*attribute)),
        _ => return Err(malformed(format!("invalid path: /gotapi/{path}"))),
    };

    let Some(verb) = Method::from_http(method.as_str()) else {
        return Err(malformed(format!("unsupported method: {method}")));
    };
    let is_event = attribute.is_some_and(is_event_attribute);
    let action = match verb {
        Method::Put if is_event => Action::Register,
        Method::Delete if is_event => Action::Unregister,
        _ => Action::Invoke,
    };

    let mut request = Request {
        action,
        method: verb,
        origin: headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string),
        service_id: query.remove("serviceId"),
        profile: Some(profile.to_string()),
        interface: interface.map(ToString::to_string),
        attribute: attribute.map(ToString::to_string),
        access_token: query.remove("accessToken"),
        receiver_address: receiver_address(&mut query),
        session_key: query.remove("sessionKey"),
        params: serde_json::Map::new(),
    };

    if !body.is_empty() {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(fields)) => request.params.extend(fields),
            Ok(_) => return Err(malformed("request body must be a JSON object")),
            Err(e) => return Err(malformed(format!("invalid request body: {e}"))),
        }
    }
    request
        .params
        .extend(query.into_iter().map(|(k, v)| (k, Value::String(v))));

    Ok(request)
}

/// Receiver address from `receiverAddress`, or its short alias `receiver`
fn receiver_address(query: &mut HashMap<String, String>) -> Option<String> {
    let full = query.remove("receiverAddress");
    let short = query.remove("receiver");
    full.or(short)
}

/// Event attributes are named `on<Something>`
fn is_event_attribute(attribute: &str) -> bool {
    attribute
        .get(..2)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("on"))
        && attribute.len() > 2
}

fn malformed(message: impl Into<String>) -> Response {
    Response::error(ErrorCode::MalformedRequest, message)
}

/// HTTP status for a broker response
#[must_use]
pub fn status_for(response: &Response) -> StatusCode {
    let Some(code) = response.error_code else {
        return StatusCode::OK;
    };

    match code {
        ErrorCode::OriginNotSpecified
        | ErrorCode::OriginNotUnique
        | ErrorCode::OriginNotAllowed
        | ErrorCode::Permission => StatusCode::FORBIDDEN,
        ErrorCode::PluginNotFound | ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::MalformedRequest | ErrorCode::NotSupportProfile => StatusCode::BAD_REQUEST,
        ErrorCode::Plugin => StatusCode::BAD_GATEWAY,
        ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
