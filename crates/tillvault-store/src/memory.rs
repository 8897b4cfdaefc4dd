//! In-memory implementation of the storage traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use tillvault_core::{AuditEntry, AuditFilter, ConfigPath, WrappedKeyRecord};

use crate::error::{Result, StoreError};
use crate::traits::{AuditBackend, BackingStore, Children, KeyVault};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Non-root containers. Roots exist implicitly.
    containers: BTreeSet<ConfigPath>,

    /// Value blobs by value path.
    values: BTreeMap<ConfigPath, Bytes>,

    /// Wrapped keys: (key_id, version) -> record.
    keys: BTreeMap<(String, u32), WrappedKeyRecord>,

    /// Audit entries in append order.
    audit: Vec<AuditEntry>,

    /// Last assigned audit sequence number.
    audit_seq: u64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn has_container(&self, container: &ConfigPath) -> bool {
        container.is_root() || self.containers.contains(container)
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn raw_get(&self, path: &ConfigPath) -> Result<Option<Bytes>> {
        let inner = self.read()?;
        Ok(inner.values.get(path).cloned())
    }

    async fn raw_set(&self, path: &ConfigPath, blob: Bytes) -> Result<()> {
        let mut inner = self.write()?;
        for ancestor in path.container().ancestors().filter(|p| !p.is_root()) {
            inner.containers.insert(ancestor);
        }
        inner.values.insert(path.clone(), blob);
        Ok(())
    }

    async fn raw_delete(&self, path: &ConfigPath) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.values.remove(path).is_some())
    }

    async fn raw_list_children(&self, container: &ConfigPath) -> Result<Option<Children>> {
        let inner = self.read()?;
        if !inner.has_container(container) {
            return Ok(None);
        }

        let containers = inner
            .containers
            .iter()
            .filter(|c| c.parent().as_ref() == Some(container))
            .map(|c| c.name().to_string())
            .collect();
        let values = inner
            .values
            .keys()
            .filter(|v| v.container() == *container)
            .map(|v| v.name().to_string())
            .collect();

        Ok(Some(Children { containers, values }))
    }

    async fn container_exists(&self, container: &ConfigPath) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner.has_container(container))
    }

    async fn raw_delete_container(&self, container: &ConfigPath) -> Result<bool> {
        if container.is_root() {
            return Ok(false);
        }
        let mut inner = self.write()?;
        if !inner.containers.contains(container) {
            return Ok(false);
        }
        let occupied = inner.containers.iter().any(|c| container.is_ancestor_of(c))
            || inner.values.keys().any(|v| container.is_ancestor_of(v));
        if occupied {
            return Err(StoreError::ContainerNotEmpty(container.to_string()));
        }
        Ok(inner.containers.remove(container))
    }
}

#[async_trait]
impl KeyVault for MemoryStore {
    async fn load_key(&self, key_id: &str) -> Result<Vec<WrappedKeyRecord>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .values()
            .filter(|r| r.key_id == key_id)
            .cloned()
            .collect())
    }

    async fn insert_version(&self, record: &WrappedKeyRecord) -> Result<WrappedKeyRecord> {
        let mut inner = self.write()?;
        let stored = inner
            .keys
            .entry((record.key_id.clone(), record.version))
            .or_insert_with(|| record.clone());
        Ok(stored.clone())
    }

    async fn set_active(&self, key_id: &str, version: u32, active: bool) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(record) = inner.keys.get_mut(&(key_id.to_string(), version)) {
            record.active = active;
        }
        Ok(())
    }

    async fn delete_key(&self, key_id: &str) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.keys.len();
        inner.keys.retain(|(id, _), _| id != key_id);
        Ok(before - inner.keys.len())
    }

    async fn list_key_ids(&self) -> Result<Vec<String>> {
        let inner = self.read()?;
        let ids: BTreeSet<&String> = inner.keys.keys().map(|(id, _)| id).collect();
        Ok(ids.into_iter().cloned().collect())
    }
}

#[async_trait]
impl AuditBackend for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> Result<u64> {
        let mut inner = self.write()?;
        inner.audit_seq += 1;
        let seq = inner.audit_seq;
        let mut stored = entry.clone();
        stored.seq = seq;
        inner.audit.push(stored);
        Ok(seq)
    }

    async fn last_entry(&self) -> Result<Option<AuditEntry>> {
        let inner = self.read()?;
        Ok(inner.audit.iter().max_by_key(|e| e.seq).cloned())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let inner = self.read()?;
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.timestamp, e.seq));
        Ok(entries)
    }

    async fn delete_matching(&self, filter: &AuditFilter) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.audit.len();
        inner.audit.retain(|e| !filter.matches(e));
        Ok(before - inner.audit.len())
    }

    async fn delete_older_than(&self, cutoff: i64) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.audit.len();
        inner.audit.retain(|e| e.timestamp >= cutoff);
        Ok(before - inner.audit.len())
    }

    async fn delete_oldest_beyond(&self, keep: usize) -> Result<usize> {
        let mut inner = self.write()?;
        let excess = inner.audit.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }
        inner.audit.sort_by_key(|e| (e.timestamp, e.seq));
        inner.audit.drain(..excess);
        inner.audit.sort_by_key(|e| e.seq);
        Ok(excess)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.audit.len())
    }

    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }
}
