//! Storage traits: the abstract interfaces for the three persistence regions.
//!
//! The orchestrator, key manager and audit log each hold one of these as a
//! trait object (or generic), so SQLite and in-memory backends are
//! interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use tillvault_core::{AuditEntry, AuditFilter, ConfigPath, WrappedKeyRecord};

use crate::error::Result;

/// Direct children of a container, each list sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Children {
    /// Child container names.
    pub containers: Vec<String>,
    /// Value names held directly by the container.
    pub values: Vec<String>,
}

impl Children {
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.values.is_empty()
    }
}

/// Hierarchical blob storage addressed by [`ConfigPath`].
///
/// # Design Notes
///
/// - **Opaque values**: blobs are returned exactly as written.
/// - **Implicit containers**: `raw_set` creates every missing ancestor.
/// - **Roots**: a root container always exists and can never be deleted.
#[async_trait]
pub trait BackingStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Values
    // ─────────────────────────────────────────────────────────────────────────

    /// Read the blob at a value path.
    async fn raw_get(&self, path: &ConfigPath) -> Result<Option<Bytes>>;

    /// Write the blob at a value path, creating missing containers.
    async fn raw_set(&self, path: &ConfigPath, blob: Bytes) -> Result<()>;

    /// Remove a value. Returns whether it existed.
    async fn raw_delete(&self, path: &ConfigPath) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Containers
    // ─────────────────────────────────────────────────────────────────────────

    /// List the direct children of a container. `None` if it does not exist.
    async fn raw_list_children(&self, container: &ConfigPath) -> Result<Option<Children>>;

    /// Whether a container exists.
    async fn container_exists(&self, container: &ConfigPath) -> Result<bool>;

    /// Remove an empty container. Returns whether it existed.
    ///
    /// Fails with `ContainerNotEmpty` if children remain.
    async fn raw_delete_container(&self, container: &ConfigPath) -> Result<bool>;
}

/// Persistence for wrapped key records.
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// All versions of a key, ascending by version.
    async fn load_key(&self, key_id: &str) -> Result<Vec<WrappedKeyRecord>>;

    /// Insert a key version.
    ///
    /// If the `(key_id, version)` pair already exists the stored record is
    /// left untouched and returned, so racing writers converge on one key.
    async fn insert_version(&self, record: &WrappedKeyRecord) -> Result<WrappedKeyRecord>;

    /// Flip the active flag on one version.
    async fn set_active(&self, key_id: &str, version: u32, active: bool) -> Result<()>;

    /// Delete every version of a key. Returns how many were removed.
    async fn delete_key(&self, key_id: &str) -> Result<usize>;

    /// All key ids with at least one version, sorted.
    async fn list_key_ids(&self) -> Result<Vec<String>>;
}

/// Append-only persistence for audit entries.
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Append an entry. Returns the assigned sequence number.
    async fn append(&self, entry: &AuditEntry) -> Result<u64>;

    /// The most recently appended entry.
    async fn last_entry(&self) -> Result<Option<AuditEntry>>;

    /// Matching entries ordered by `(timestamp, seq)`.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;

    /// Delete matching entries. Returns how many were removed.
    async fn delete_matching(&self, filter: &AuditFilter) -> Result<usize>;

    /// Delete entries with `timestamp < cutoff`.
    async fn delete_older_than(&self, cutoff: i64) -> Result<usize>;

    /// Keep the newest `keep` entries, delete the rest.
    async fn delete_oldest_beyond(&self, keep: usize) -> Result<usize>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;
}
