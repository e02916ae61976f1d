//! Device Gateway - Local API gateway and event broker for device plugins
//!
//! This library provides the core functionality for the device gateway:
//! - Plugin discovery and qualified service IDs
//! - Request routing to plugin adapters
//! - Event subscriptions and fan-out to receivers
//! - Origin validation and local access tokens
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Clients                          │
//! │        HTTP /gotapi   │   WS /ws/events              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Device Gateway                       │
//! │  Origin  │  OAuth  │  Router  │  Sessions │  Broker  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Plugin Adapters (WS /ws/adapter)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod message;
pub mod plugins;
pub mod router;
pub mod security;

pub use config::Config;
pub use context::BrokerContext;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
