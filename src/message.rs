//! Wire types shared by clients, the broker and adapters
//!
//! Requests and events are addressed by a profile/interface/attribute triple.
//! Path components compare case-insensitively; everything else is exact.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;
use crate::security::OriginError;

/// What the caller wants done with the addressed attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Subscribe to an event attribute
    Register,
    /// Cancel a subscription
    Unregister,
    /// One-shot call
    #[default]
    Invoke,
}

/// Verb carried through to adapters for invoke requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Parse an HTTP method name
    #[must_use]
    pub fn from_http(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Inbound request from a client application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Raw or qualified service id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Opaque delivery target for asynchronous events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_address: Option<String>,
    /// Legacy combined `receiver.plugin` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Request {
    /// Create an invoke request for a profile
    #[must_use]
    pub fn new(action: Action, profile: &str) -> Self {
        Self {
            action,
            profile: Some(profile.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = Some(origin.to_string());
        self
    }

    #[must_use]
    pub fn with_service_id(mut self, service_id: &str) -> Self {
        self.service_id = Some(service_id.to_string());
        self
    }

    #[must_use]
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.attribute = Some(attribute.to_string());
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    #[must_use]
    pub fn with_receiver(mut self, receiver: &str) -> Self {
        self.receiver_address = Some(receiver.to_string());
        self
    }

    #[must_use]
    pub fn with_session_key(mut self, key: &str) -> Self {
        self.session_key = Some(key.to_string());
        self
    }

    /// `profile/interface/attribute` for logging
    #[must_use]
    pub fn path(&self) -> String {
        [&self.profile, &self.interface, &self.attribute]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Error codes surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    OriginNotSpecified,
    OriginNotUnique,
    OriginNotAllowed,
    PluginNotFound,
    Timeout,
    Permission,
    MalformedRequest,
    NotSupportProfile,
    SessionNotFound,
    Plugin,
    Unknown,
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Origin(OriginError::NotSpecified) => Self::OriginNotSpecified,
            Error::Origin(OriginError::NotUnique) => Self::OriginNotUnique,
            Error::Origin(OriginError::NotAllowed) => Self::OriginNotAllowed,
            Error::PluginNotFound(_) => Self::PluginNotFound,
            Error::Timeout(_) => Self::Timeout,
            Error::Permission(_) => Self::Permission,
            Error::MalformedRequest(_) => Self::MalformedRequest,
            Error::SessionNotFound => Self::SessionNotFound,
            Error::Adapter { .. } => Self::Plugin,
            _ => Self::Unknown,
        }
    }
}

/// Outcome flag of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Error,
}

/// Exactly one of these is produced for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub result: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Plugin that produced the response, when forwarded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Response {
    /// Successful empty response
    #[must_use]
    pub fn ok() -> Self {
        Self {
            result: Outcome::Ok,
            error_code: None,
            error_message: None,
            plugin_id: None,
            body: Map::new(),
        }
    }

    /// Error response with an explicit code
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            result: Outcome::Error,
            error_code: Some(code),
            error_message: Some(message.into()),
            plugin_id: None,
            body: Map::new(),
        }
    }

    /// Add a body field
    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.body.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result == Outcome::Ok
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        let mut response = Self::error(ErrorCode::from(&err), err.to_string());
        response.plugin_id = err.plugin_id().map(ToString::to_string);
        response
    }
}

/// Asynchronous notification pushed by an adapter and delivered to a receiver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_address: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Event {
    /// Create an event for a profile/attribute
    #[must_use]
    pub fn new(profile: &str, attribute: &str) -> Self {
        Self {
            profile: Some(profile.to_string()),
            attribute: Some(attribute.to_string()),
            ..Self::default()
        }
    }
}
