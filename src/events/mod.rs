//! Event subscriptions and delivery
//!
//! Clients register for event attributes (`on...`) through the router. The
//! resulting sessions live in the [`EventSessionTable`]; adapters push
//! notifications which the [`EventBroker`] matches and hands to an
//! [`EventSink`].

pub mod broker;
pub mod protocol;
pub mod session;
pub mod table;

pub use broker::{
    EventBroker, EventSink, SERVICE_CHANGE_ATTRIBUTE, SERVICE_DISCOVERY_PROFILE, is_service_change,
};
pub use protocol::EventProtocol;
pub use session::{ANONYMOUS_ORIGIN, EventSession, SessionKey};
pub use table::EventSessionTable;
