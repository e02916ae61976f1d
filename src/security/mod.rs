//! Security module for origin policy and local authorization

pub mod oauth;
pub mod origin;
pub mod validator;
pub mod whitelist;

pub use oauth::{AccessToken, LocalAuthorizationService};
pub use origin::Origin;
pub use validator::{OriginError, OriginValidator};
pub use whitelist::{Whitelist, WhitelistEntry};
