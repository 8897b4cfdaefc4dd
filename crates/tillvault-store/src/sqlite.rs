//! SQLite implementation of the storage traits.
//!
//! This is the primary storage backend for Tillvault. It uses rusqlite with
//! bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`.
//! One database file holds all three regions (values, keys, audit).

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use tillvault_core::{now_millis, AuditEntry, AuditFilter, ConfigPath, WrappedKeyRecord};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{AuditBackend, BackingStore, Children, KeyVault};

/// How long SQLite waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

fn value_key(path: &ConfigPath) -> (String, String) {
    (path.container().to_string(), path.name().to_string())
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<WrappedKeyRecord> {
    Ok(WrappedKeyRecord {
        key_id: row.get("key_id")?,
        version: row.get("version")?,
        wrapped: row.get("wrapped")?,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
        active: row.get::<_, i64>("active")? != 0,
    })
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let operation: String = row.get("operation")?;
    let details: String = row.get("details")?;
    Ok(AuditEntry {
        seq: row.get::<_, i64>("seq")? as u64,
        id: row.get("id")?,
        path: row.get("path")?,
        operation: operation.parse().map_err(|e| conversion_error(3, e))?,
        principal: row.get("principal")?,
        timestamp: row.get("timestamp")?,
        old_digest: row.get("old_digest")?,
        new_digest: row.get("new_digest")?,
        success: row.get::<_, i64>("success")? != 0,
        error: row.get("error")?,
        details: serde_json::from_str(&details).map_err(|e| conversion_error(10, e))?,
        prev_hash: row.get("prev_hash")?,
        entry_hash: row.get("entry_hash")?,
    })
}

/// Build a `WHERE` clause and its positional arguments from a filter.
fn filter_clause(filter: &AuditFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut args = Vec::new();

    if let Some(ref path) = filter.path {
        clauses.push("path = ?");
        args.push(Value::Text(path.clone()));
    }
    if let Some(ref principal) = filter.principal {
        clauses.push("principal = ?");
        args.push(Value::Text(principal.clone()));
    }
    if let Some(operation) = filter.operation {
        clauses.push("operation = ?");
        args.push(Value::Text(operation.as_str().to_string()));
    }
    if let Some(from) = filter.from {
        clauses.push("timestamp >= ?");
        args.push(Value::Integer(from));
    }
    if let Some(to) = filter.to {
        clauses.push("timestamp <= ?");
        args.push(Value::Integer(to));
    }

    if clauses.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), args)
    }
}

const AUDIT_COLUMNS: &str = "seq, id, path, operation, principal, timestamp, old_digest, \
     new_digest, success, error, details, prev_hash, entry_hash";

#[async_trait]
impl BackingStore for SqliteStore {
    async fn raw_get(&self, path: &ConfigPath) -> Result<Option<Bytes>> {
        let (container, name) = value_key(path);
        self.run(move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT blob FROM config_values WHERE container = ?1 AND name = ?2",
                    params![container, name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(blob.map(Bytes::from))
        })
        .await
    }

    async fn raw_set(&self, path: &ConfigPath, blob: Bytes) -> Result<()> {
        let (container, name) = value_key(path);
        let ancestors: Vec<(String, String, String)> = path
            .container()
            .ancestors()
            .filter(|p| !p.is_root())
            .filter_map(|p| {
                let parent = p.parent()?;
                Some((p.to_string(), parent.to_string(), p.name().to_string()))
            })
            .collect();

        self.run(move |conn| {
            let now = now_millis();
            let tx = conn.transaction()?;
            for (path, parent, name) in &ancestors {
                tx.execute(
                    "INSERT OR IGNORE INTO config_containers (path, parent, name, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![path, parent, name, now],
                )?;
            }
            tx.execute(
                "INSERT INTO config_values (container, name, blob, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(container, name) DO UPDATE SET blob = ?3, updated_at = ?4",
                params![container, name, &blob[..], now],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn raw_delete(&self, path: &ConfigPath) -> Result<bool> {
        let (container, name) = value_key(path);
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM config_values WHERE container = ?1 AND name = ?2",
                params![container, name],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn raw_list_children(&self, container: &ConfigPath) -> Result<Option<Children>> {
        let is_root = container.is_root();
        let key = container.to_string();
        self.run(move |conn| {
            if !is_root {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM config_containers WHERE path = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Ok(None);
                }
            }

            let containers = conn
                .prepare("SELECT name FROM config_containers WHERE parent = ?1 ORDER BY name")?
                .query_map(params![key], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            let values = conn
                .prepare("SELECT name FROM config_values WHERE container = ?1 ORDER BY name")?
                .query_map(params![key], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;

            Ok(Some(Children { containers, values }))
        })
        .await
    }

    async fn container_exists(&self, container: &ConfigPath) -> Result<bool> {
        if container.is_root() {
            return Ok(true);
        }
        let key = container.to_string();
        self.run(move |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM config_containers WHERE path = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(exists.is_some())
        })
        .await
    }

    async fn raw_delete_container(&self, container: &ConfigPath) -> Result<bool> {
        if container.is_root() {
            return Ok(false);
        }
        let key = container.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let occupied: i64 = tx.query_row(
                "SELECT (SELECT COUNT(*) FROM config_containers WHERE parent = ?1)
                      + (SELECT COUNT(*) FROM config_values WHERE container = ?1)",
                params![key],
                |row| row.get(0),
            )?;
            if occupied > 0 {
                return Err(StoreError::ContainerNotEmpty(key));
            }
            let removed = tx.execute("DELETE FROM config_containers WHERE path = ?1", params![key])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl KeyVault for SqliteStore {
    async fn load_key(&self, key_id: &str) -> Result<Vec<WrappedKeyRecord>> {
        let key_id = key_id.to_string();
        self.run(move |conn| {
            let records = conn
                .prepare(
                    "SELECT key_id, version, wrapped, created_at, expires_at, active
                     FROM wrapped_keys WHERE key_id = ?1 ORDER BY version",
                )?
                .query_map(params![key_id], row_to_key)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn insert_version(&self, record: &WrappedKeyRecord) -> Result<WrappedKeyRecord> {
        let record = record.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO wrapped_keys
                 (key_id, version, wrapped, created_at, expires_at, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.key_id,
                    record.version,
                    record.wrapped,
                    record.created_at,
                    record.expires_at,
                    record.active as i64,
                ],
            )?;
            let stored = tx.query_row(
                "SELECT key_id, version, wrapped, created_at, expires_at, active
                 FROM wrapped_keys WHERE key_id = ?1 AND version = ?2",
                params![record.key_id, record.version],
                row_to_key,
            )?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn set_active(&self, key_id: &str, version: u32, active: bool) -> Result<()> {
        let key_id = key_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE wrapped_keys SET active = ?3 WHERE key_id = ?1 AND version = ?2",
                params![key_id, version, active as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_key(&self, key_id: &str) -> Result<usize> {
        let key_id = key_id.to_string();
        self.run(move |conn| {
            Ok(conn.execute("DELETE FROM wrapped_keys WHERE key_id = ?1", params![key_id])?)
        })
        .await
    }

    async fn list_key_ids(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let ids = conn
                .prepare("SELECT DISTINCT key_id FROM wrapped_keys ORDER BY key_id")?
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl AuditBackend for SqliteStore {
    async fn append(&self, entry: &AuditEntry) -> Result<u64> {
        let entry = entry.clone();
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO audit_log
                 (id, path, operation, principal, timestamp, old_digest, new_digest,
                  success, error, details, prev_hash, entry_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    entry.id,
                    entry.path,
                    entry.operation.as_str(),
                    entry.principal,
                    entry.timestamp,
                    entry.old_digest,
                    entry.new_digest,
                    entry.success as i64,
                    entry.error,
                    details,
                    entry.prev_hash,
                    entry.entry_hash,
                ],
            )?;
            Ok(conn.last_insert_rowid() as u64)
        })
        .await
    }

    async fn last_entry(&self) -> Result<Option<AuditEntry>> {
        self.run(|conn| {
            let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY seq DESC LIMIT 1");
            Ok(conn.query_row(&sql, [], row_to_entry).optional()?)
        })
        .await
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let (clause, args) = filter_clause(filter);
        self.run(move |conn| {
            let sql = format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log{clause} ORDER BY timestamp, seq"
            );
            let entries = conn
                .prepare(&sql)?
                .query_map(params_from_iter(args.iter()), row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn delete_matching(&self, filter: &AuditFilter) -> Result<usize> {
        let (clause, args) = filter_clause(filter);
        self.run(move |conn| {
            let sql = format!("DELETE FROM audit_log{clause}");
            Ok(conn.execute(&sql, params_from_iter(args.iter()))?)
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: i64) -> Result<usize> {
        self.run(move |conn| {
            Ok(conn.execute("DELETE FROM audit_log WHERE timestamp < ?1", params![cutoff])?)
        })
        .await
    }

    async fn delete_oldest_beyond(&self, keep: usize) -> Result<usize> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM audit_log WHERE seq IN (
                     SELECT seq FROM audit_log
                     ORDER BY timestamp DESC, seq DESC
                     LIMIT -1 OFFSET ?1
                 )",
                params![keep],
            )?)
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.run(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillvault_core::{AuditOperation, PathResolver};

    fn resolve(raw: &str) -> ConfigPath {
        PathResolver::default().resolve(raw).unwrap()
    }

    fn container(raw: &str) -> ConfigPath {
        PathResolver::default().resolve_container(raw).unwrap()
    }

    #[tokio::test]
    async fn test_value_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let path = resolve(r"config\db\main");

        assert!(store.raw_get(&path).await.unwrap().is_none());
        store.raw_set(&path, Bytes::from_static(b"one")).await.unwrap();
        store.raw_set(&path, Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(store.raw_get(&path).await.unwrap().unwrap(), Bytes::from_static(b"two"));

        assert!(store.raw_delete(&path).await.unwrap());
        assert!(store.raw_get(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hierarchy() {
        let store = SqliteStore::open_memory().unwrap();
        store.raw_set(&resolve(r"config\db\main"), Bytes::new()).await.unwrap();
        store.raw_set(&resolve(r"config\db\replicas\r1"), Bytes::new()).await.unwrap();

        let db = container(r"config\db");
        let children = store.raw_list_children(&db).await.unwrap().unwrap();
        assert_eq!(children.containers, vec!["replicas"]);
        assert_eq!(children.values, vec!["main"]);

        let root = store.raw_list_children(&container("config")).await.unwrap().unwrap();
        assert_eq!(root.containers, vec!["db"]);

        assert!(matches!(
            store.raw_delete_container(&db).await,
            Err(StoreError::ContainerNotEmpty(_))
        ));

        store.raw_delete(&resolve(r"config\db\replicas\r1")).await.unwrap();
        assert!(store
            .raw_delete_container(&container(r"config\db\replicas"))
            .await
            .unwrap());
        assert!(!store
            .container_exists(&container(r"config\db\replicas"))
            .await
            .unwrap());
        assert!(store.container_exists(&container("system")).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys() {
        let store = SqliteStore::open_memory().unwrap();
        let record = WrappedKeyRecord {
            key_id: "config-master".into(),
            version: 1,
            wrapped: vec![1, 2, 3],
            created_at: 10,
            expires_at: Some(20),
            active: true,
        };

        let stored = store.insert_version(&record).await.unwrap();
        assert_eq!(stored, record);

        let rival = WrappedKeyRecord {
            wrapped: vec![9],
            ..record.clone()
        };
        assert_eq!(store.insert_version(&rival).await.unwrap(), record);

        store.set_active("config-master", 1, false).await.unwrap();
        assert!(!store.load_key("config-master").await.unwrap()[0].active);
        assert_eq!(store.list_key_ids().await.unwrap(), vec!["config-master"]);
        assert_eq!(store.delete_key("config-master").await.unwrap(), 1);
        assert!(store.list_key_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audit_filtering_and_order() {
        let store = SqliteStore::open_memory().unwrap();
        let ops = [
            (AuditOperation::SetValue, "alice", 300),
            (AuditOperation::GetValue, "bob", 100),
            (AuditOperation::GetValue, "alice", 200),
        ];
        for (i, (op, who, ts)) in ops.into_iter().enumerate() {
            let mut entry = AuditEntry::new(r"config\db\main", op, who)
                .succeeded()
                .with_detail("attempt", i.to_string());
            entry.id = format!("id-{i}");
            entry.timestamp = ts;
            store.append(&entry).await.unwrap();
        }

        let all = store.query(&AuditFilter::all()).await.unwrap();
        assert_eq!(all.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![100, 200, 300]);
        assert_eq!(all[0].details.get("attempt").map(String::as_str), Some("1"));

        let alice = store.query(&AuditFilter::all().principal("alice")).await.unwrap();
        assert_eq!(alice.len(), 2);

        let reads = store
            .query(&AuditFilter::all().operation(AuditOperation::GetValue).since(150))
            .await
            .unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].principal, "alice");

        assert_eq!(store.delete_matching(&AuditFilter::all().principal("bob")).await.unwrap(), 1);
        assert_eq!(store.delete_oldest_beyond(1).await.unwrap(), 1);
        assert_eq!(store.last_entry().await.unwrap().unwrap().id, "id-0");
        assert_eq!(store.count().await.unwrap(), 1);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tillvault.db");
        let path = resolve(r"system\terminal\id");

        {
            let store = SqliteStore::open(&file).unwrap();
            store.raw_set(&path, Bytes::from_static(b"T-01")).await.unwrap();
        }

        let store = SqliteStore::open(&file).unwrap();
        assert_eq!(store.raw_get(&path).await.unwrap().unwrap(), Bytes::from_static(b"T-01"));
    }
}
