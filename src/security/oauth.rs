//! Local authorization service
//!
//! Issues opaque access tokens scoped to one (origin, service) pair and
//! validates them on every request that needs authorization. Tokens are
//! persisted so that pairings survive restarts. Web origins are stored in
//! normalized form, so `https://h` and `https://h:443` share a token.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{OptionalExtension, params_from_iter};
use serde::Serialize;

use super::Origin;
use crate::db::DbPool;
use crate::{Error, Result};

/// Random bytes per token (hex-encoded on the wire)
const TOKEN_BYTES: usize = 32;

/// An issued access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub token: String,
    pub origin: String,
    /// Qualified service id the token is scoped to
    pub service_id: String,
    pub plugin_id: String,
    /// Profiles the token grants; empty grants every profile
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Check if the token has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Whether the token grants access to a profile
    #[must_use]
    pub fn grants(&self, profile: &str) -> bool {
        self.scopes.is_empty() || self.scopes.iter().any(|s| s.eq_ignore_ascii_case(profile))
    }
}

/// Token issuing and validation backed by the store
#[derive(Clone)]
pub struct LocalAuthorizationService {
    pool: DbPool,
    ttl: Duration,
}

impl LocalAuthorizationService {
    /// Create a service issuing tokens valid for `ttl`
    #[must_use]
    pub const fn new(pool: DbPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Unexpired token for an (origin, service) pair
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn get_access_token(&self, origin: &str, service_id: &str) -> Result<Option<String>> {
        Ok(self
            .find(origin, service_id)?
            .filter(|t| !t.is_expired())
            .map(|t| t.token))
    }

    /// Issue a token for an (origin, service) pair
    ///
    /// An existing unexpired token is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be updated
    pub fn authorize(
        &self,
        origin: &str,
        service_id: &str,
        plugin_id: &str,
        scopes: &[String],
    ) -> Result<AccessToken> {
        if let Some(existing) = self.find(origin, service_id)?
            && !existing.is_expired()
        {
            return Ok(existing);
        }
        let (token, _) = self.reauthorize(origin, service_id, plugin_id, scopes)?;
        Ok(token)
    }

    /// Replace the token for an (origin, service) pair
    ///
    /// Returns the new token and the one it replaced, if any. Used on
    /// re-pairing so that sessions holding the old token can be moved over.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be updated
    pub fn reauthorize(
        &self,
        origin: &str,
        service_id: &str,
        plugin_id: &str,
        scopes: &[String],
    ) -> Result<(AccessToken, Option<String>)> {
        let previous = self.find(origin, service_id)?.map(|t| t.token);

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| Error::Config("token lifetime out of range".to_string()))?;
        let token = AccessToken {
            token: generate_token(),
            origin: origin_key(origin),
            service_id: service_id.to_string(),
            plugin_id: plugin_id.to_string(),
            scopes: scopes.to_vec(),
            created_at: now,
            expires_at,
        };

        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO access_tokens
             (token, origin, service_id, plugin_id, scopes, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            [
                &token.token,
                &token.origin,
                &token.service_id,
                &token.plugin_id,
                &token.scopes.join(","),
                &token.created_at.to_rfc3339(),
                &token.expires_at.to_rfc3339(),
            ],
        )?;

        tracing::info!(
            origin = %token.origin,
            service_id,
            plugin_id,
            replaced = previous.is_some(),
            "access token issued"
        );
        Ok((token, previous))
    }

    /// Validate a token for an (origin, service) pair and profile
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn check(&self, token: &str, origin: &str, service_id: &str, profile: &str) -> Result<bool> {
        let Some(stored) = self.find(origin, service_id)? else {
            return Ok(false);
        };
        Ok(constant_time_eq(stored.token.as_bytes(), token.as_bytes())
            && !stored.is_expired()
            && stored.grants(profile))
    }

    /// Revoke a single token
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be updated
    pub fn revoke(&self, token: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let removed = conn.execute("DELETE FROM access_tokens WHERE token = ?1", [token])?;
        Ok(removed > 0)
    }

    /// Revoke every token issued for a plugin, returning them
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be updated
    pub fn revoke_for_plugin(&self, plugin_id: &str) -> Result<Vec<String>> {
        self.delete_returning(
            "SELECT token FROM access_tokens WHERE plugin_id = ?1",
            "DELETE FROM access_tokens WHERE plugin_id = ?1",
            Some(plugin_id),
        )
    }

    /// Revoke every token, returning them
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be updated
    pub fn reset(&self) -> Result<Vec<String>> {
        let revoked = self.delete_returning(
            "SELECT token FROM access_tokens",
            "DELETE FROM access_tokens",
            None,
        )?;
        tracing::info!(count = revoked.len(), "all access tokens revoked");
        Ok(revoked)
    }

    /// All stored tokens
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn list(&self) -> Result<Vec<AccessToken>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT token, origin, service_id, plugin_id, scopes, created_at, expires_at
             FROM access_tokens ORDER BY created_at",
        )?;
        let tokens = stmt
            .query_map([], row_to_token)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    fn find(&self, origin: &str, service_id: &str) -> Result<Option<AccessToken>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let token = conn
            .query_row(
                "SELECT token, origin, service_id, plugin_id, scopes, created_at, expires_at
                 FROM access_tokens WHERE origin = ?1 AND service_id = ?2",
                [origin_key(origin).as_str(), service_id],
                row_to_token,
            )
            .optional()?;
        Ok(token)
    }

    fn delete_returning(
        &self,
        select: &str,
        delete: &str,
        plugin_id: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let tx = conn.transaction()?;

        let tokens = {
            let mut stmt = tx.prepare(select)?;
            stmt.query_map(params_from_iter(plugin_id), |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?
        };
        tx.execute(delete, params_from_iter(plugin_id))?;
        tx.commit()?;

        Ok(tokens)
    }
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessToken> {
    let scopes: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let expires_at: String = row.get(6)?;

    Ok(AccessToken {
        token: row.get(0)?,
        origin: row.get(1)?,
        service_id: row.get(2)?,
        plugin_id: row.get(3)?,
        scopes: scopes
            .split(',')
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        created_at: parse_time(&created_at),
        // Unparseable expiry counts as already expired
        expires_at: DateTime::parse_from_rfc3339(&expires_at)
            .map_or(DateTime::<Utc>::MIN_UTC, |dt| dt.with_timezone(&Utc)),
    })
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

/// Generate a random hex token
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Stored form of an origin
fn origin_key(origin: &str) -> String {
    Origin::parse(origin).to_string()
}

/// Constant-time byte comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
