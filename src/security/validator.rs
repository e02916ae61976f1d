//! Origin policy enforcement

use std::sync::Arc;

use thiserror::Error;

use super::{Origin, Whitelist};

/// Reason an origin was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("origin is not specified")]
    NotSpecified,
    #[error("origin is not unique")]
    NotUnique,
    #[error("origin is not allowed")]
    NotAllowed,
}

/// Validates caller origins against the always-allowed set and the whitelist
pub struct OriginValidator {
    require_origin: bool,
    block_origin: bool,
    always_allowed: Vec<Origin>,
    whitelist: Arc<Whitelist>,
}

impl OriginValidator {
    /// Create a validator
    ///
    /// `require_origin` turns on origin enforcement at all; `block_origin`
    /// additionally restricts callers to the whitelist.
    #[must_use]
    pub fn new(
        require_origin: bool,
        block_origin: bool,
        always_allowed: &[String],
        whitelist: Arc<Whitelist>,
    ) -> Self {
        Self {
            require_origin,
            block_origin,
            always_allowed: always_allowed.iter().map(|o| Origin::parse(o)).collect(),
            whitelist,
        }
    }

    /// Whether requests must carry an origin
    #[must_use]
    pub const fn requires_origin(&self) -> bool {
        self.require_origin
    }

    /// Check a caller origin
    ///
    /// # Errors
    ///
    /// Returns the reason the origin is rejected
    pub async fn check_origin(&self, origin: Option<&str>) -> Result<(), OriginError> {
        if !self.require_origin {
            return Ok(());
        }

        let raw = origin.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Err(OriginError::NotSpecified);
        }
        if raw.split_whitespace().nth(1).is_some() {
            return Err(OriginError::NotUnique);
        }

        let origin = Origin::parse(raw);
        if self.always_allowed.iter().any(|a| origin.matches(a)) {
            return Ok(());
        }
        if !self.block_origin || self.whitelist.allows(&origin).await {
            return Ok(());
        }

        tracing::warn!(origin = %raw, "origin rejected");
        Err(OriginError::NotAllowed)
    }
}
