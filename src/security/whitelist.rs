//! Persistent origin whitelist
//!
//! Entries live in the `whitelist` table and are mirrored in memory so that
//! origin checks never touch the database.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Origin;
use crate::db::DbPool;
use crate::{Error, Result};

/// A whitelisted origin pattern
#[derive(Debug, Clone, Serialize)]
pub struct WhitelistEntry {
    pub id: String,
    pub origin: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pattern: Origin,
}

/// Origin allow-list backed by the store
pub struct Whitelist {
    pool: DbPool,
    entries: RwLock<Vec<WhitelistEntry>>,
}

impl Whitelist {
    /// Load the whitelist from the store
    ///
    /// # Errors
    ///
    /// Returns error if the entries cannot be read
    pub fn load(pool: DbPool) -> Result<Self> {
        let entries = read_entries(&pool)?;
        tracing::debug!(count = entries.len(), "whitelist loaded");
        Ok(Self {
            pool,
            entries: RwLock::new(entries),
        })
    }

    /// Whether any entry matches the origin
    pub async fn allows(&self, origin: &Origin) -> bool {
        self.entries
            .read()
            .await
            .iter()
            .any(|e| origin.matches(&e.pattern))
    }

    /// All entries, oldest first
    pub async fn list(&self) -> Vec<WhitelistEntry> {
        self.entries.read().await.clone()
    }

    /// Add an origin pattern
    ///
    /// # Errors
    ///
    /// Returns error if the origin is blank, already present, or the insert fails
    pub async fn add(&self, origin: &str, title: &str) -> Result<WhitelistEntry> {
        let origin = origin.trim();
        if origin.is_empty() {
            return Err(Error::Config("whitelist origin cannot be empty".to_string()));
        }

        let pattern = Origin::parse(origin);
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.pattern == pattern) {
            return Err(Error::Config(format!("origin already whitelisted: {origin}")));
        }

        let entry = WhitelistEntry {
            id: Uuid::new_v4().to_string(),
            origin: origin.to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
            pattern,
        };

        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO whitelist (id, origin, title, created_at) VALUES (?1, ?2, ?3, ?4)",
            [
                &entry.id,
                &entry.origin,
                &entry.title,
                &entry.created_at.to_rfc3339(),
            ],
        )?;

        tracing::info!(origin = %entry.origin, "origin whitelisted");
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Change the origin and title of an entry
    ///
    /// # Errors
    ///
    /// Returns error if the entry does not exist or the update fails
    pub async fn update(&self, id: &str, origin: &str, title: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Err(Error::Config(format!("whitelist entry not found: {id}")));
        };

        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "UPDATE whitelist SET origin = ?1, title = ?2 WHERE id = ?3",
            [origin.trim(), title, id],
        )?;

        entry.origin = origin.trim().to_string();
        entry.title = title.to_string();
        entry.pattern = Origin::parse(origin);
        Ok(())
    }

    /// Remove an entry by id or by origin
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails
    pub async fn remove(&self, id_or_origin: &str) -> Result<bool> {
        let pattern = Origin::parse(id_or_origin);
        let mut entries = self.entries.write().await;
        let Some(pos) = entries
            .iter()
            .position(|e| e.id == id_or_origin || e.pattern == pattern)
        else {
            return Ok(false);
        };

        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute("DELETE FROM whitelist WHERE id = ?1", [&entries[pos].id])?;

        let removed = entries.remove(pos);
        tracing::info!(origin = %removed.origin, "origin removed from whitelist");
        Ok(true)
    }
}

fn read_entries(pool: &DbPool) -> Result<Vec<WhitelistEntry>> {
    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    let mut stmt =
        conn.prepare("SELECT id, origin, title, created_at FROM whitelist ORDER BY created_at")?;

    let rows = stmt.query_map([], |row| {
        let origin: String = row.get(1)?;
        let created_at: String = row.get(3)?;
        Ok(WhitelistEntry {
            id: row.get(0)?,
            pattern: Origin::parse(&origin),
            origin,
            title: row.get(2)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
        })
    })?;

    let entries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}
