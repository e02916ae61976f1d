//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Origins allowed to call the gateway
        CREATE TABLE IF NOT EXISTS whitelist (
            id TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::debug!("migrated database to v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Access tokens issued per (origin, service)
        CREATE TABLE IF NOT EXISTS access_tokens (
            token TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            service_id TEXT NOT NULL,
            plugin_id TEXT NOT NULL,
            scopes TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            UNIQUE(origin, service_id)
        );

        CREATE INDEX IF NOT EXISTS idx_access_tokens_plugin ON access_tokens(plugin_id);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::debug!("migrated database to v2");
    Ok(())
}
