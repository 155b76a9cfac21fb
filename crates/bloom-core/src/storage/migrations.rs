//! Key-value store schema migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version (0 when the database is new)
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply `sql` atomically; a failing statement rolls the whole step back.
fn apply(conn: &Connection, sql: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: key-value table
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;
    tracing::debug!("Applied key-value store migration v1");
    Ok(())
}

/// Migration to version 2: track when each key was last written
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        "ALTER TABLE kv_store ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;
        INSERT OR IGNORE INTO schema_version (version) VALUES (2);",
    )?;
    tracing::debug!("Applied key-value store migration v{CURRENT_VERSION}");
    Ok(())
}
