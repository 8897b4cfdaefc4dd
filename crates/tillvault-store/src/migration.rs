//! Database schema migrations for SQLite.
//!
//! Versioned: each migration moves the schema from version N to N+1 inside
//! one transaction, and the applied versions are tracked in
//! `schema_migrations`.

use rusqlite::Connection;
use tillvault_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated schema");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Non-root containers; roots exist implicitly
        CREATE TABLE config_containers (
            path TEXT PRIMARY KEY,            -- canonical ConfigPath string
            parent TEXT NOT NULL,             -- canonical path of the parent
            name TEXT NOT NULL,               -- last segment
            created_at INTEGER NOT NULL
        );

        -- Opaque value blobs
        CREATE TABLE config_values (
            container TEXT NOT NULL,          -- canonical container path
            name TEXT NOT NULL,               -- value name
            blob BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (container, name)
        );

        -- Wrapped key material, one row per version
        CREATE TABLE wrapped_keys (
            key_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            wrapped BLOB NOT NULL,            -- output of the key protector
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            active INTEGER NOT NULL,          -- 0/1
            PRIMARY KEY (key_id, version)
        );

        -- Append-only audit trail
        CREATE TABLE audit_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            operation TEXT NOT NULL,
            principal TEXT NOT NULL,
            timestamp INTEGER NOT NULL,       -- Unix ms
            old_digest TEXT,
            new_digest TEXT,
            success INTEGER NOT NULL,
            error TEXT,
            details TEXT NOT NULL,            -- JSON object
            prev_hash TEXT,
            entry_hash TEXT
        );

        CREATE INDEX idx_containers_parent ON config_containers(parent);
        CREATE INDEX idx_audit_path ON audit_log(path);
        CREATE INDEX idx_audit_principal ON audit_log(principal);
        CREATE INDEX idx_audit_timestamp ON audit_log(timestamp, seq);
        "#,
    )?;

    Ok(())
}
