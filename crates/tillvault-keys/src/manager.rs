//! Key lifecycle: generation, caching, rotation, retirement, backup.
//!
//! ## Concurrency
//!
//! Unwrapped keys live in a per-process cache behind a `RwLock`. Anything
//! that writes to the vault, or fills the cache from it, takes the
//! persistence lock first and re-reads persisted state under it. A cache
//! fill therefore never lands after a [`KeyManager::retire`] of the same key. Across processes the vault's first-writer-wins
//! insert settles races: a loser discards its candidate and adopts the
//! stored key.
//!
//! The cache is not invalidated by other processes. A rotation performed
//! elsewhere becomes visible here after [`KeyManager::evict`] or a restart;
//! decrypting envelopes under the new version works regardless, since
//! unknown versions are loaded on demand.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tillvault_core::{now_millis, WrappedKeyRecord};
use tillvault_store::KeyVault;

use crate::error::{KeyError, Result};
use crate::key::{EncryptionKey, KeyMaterial};
use crate::protector::KeyProtector;

/// Backup document format version.
pub const BACKUP_FORMAT: u32 = 1;

/// Configuration for the key manager.
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// Lifetime of newly generated key versions. `None` means no expiry.
    pub key_ttl: Option<Duration>,

    /// Upper bound on any single vault or key-protection call.
    pub storage_timeout: Duration,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            key_ttl: None,
            storage_timeout: Duration::from_secs(5),
        }
    }
}

/// Portable export of wrapped key records.
///
/// Wrapped bytes stay wrapped: a backup only restores where the same
/// protector scope and secret exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBackup {
    pub format: u32,
    pub scope: String,
    pub created_at: i64,
    pub keys: Vec<WrappedKeyRecord>,
}

#[derive(Default)]
struct KeyRing {
    versions: BTreeMap<u32, EncryptionKey>,
    active: Option<u32>,
}

/// Owns every encryption key in the process.
pub struct KeyManager {
    vault: Arc<dyn KeyVault>,
    protector: Arc<dyn KeyProtector>,
    cache: RwLock<HashMap<String, KeyRing>>,
    persist_lock: tokio::sync::Mutex<()>,
    config: KeyManagerConfig,
}

impl KeyManager {
    /// Create a manager with default configuration.
    pub fn new(vault: Arc<dyn KeyVault>, protector: Arc<dyn KeyProtector>) -> Self {
        Self::with_config(vault, protector, KeyManagerConfig::default())
    }

    pub fn with_config(
        vault: Arc<dyn KeyVault>,
        protector: Arc<dyn KeyProtector>,
        config: KeyManagerConfig,
    ) -> Self {
        Self {
            vault,
            protector,
            cache: RwLock::new(HashMap::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the active key for `key_id`, generating it if absent.
    ///
    /// An active key past its expiry is rotated first.
    pub async fn get_or_create(&self, key_id: &str) -> Result<EncryptionKey> {
        validate_key_id(key_id)?;
        let now = now_millis();

        if let Some(key) = self.cached_active(key_id)? {
            if key.usable_for_encryption_at(now) {
                return Ok(key);
            }
        }

        let _guard = self.persist_lock.lock().await;
        let records = self.bounded(self.vault.load_key(key_id)).await?;

        match latest_active(&records) {
            Some(record) => {
                let key = self.unwrap_record(record.clone()).await?;
                if key.usable_for_encryption_at(now) {
                    self.cache_put(key.clone(), true)?;
                    return Ok(key);
                }
                tracing::info!(key_id, version = key.version, "active key expired, rotating");
                self.rotate_locked(key_id, &records).await
            }
            None if records.is_empty() => self.create_version(key_id, 1).await,
            None => self.rotate_locked(key_id, &records).await,
        }
    }

    /// The active key, if one exists. Does not generate.
    pub async fn get(&self, key_id: &str) -> Result<Option<EncryptionKey>> {
        if let Some(key) = self.cached_active(key_id)? {
            return Ok(Some(key));
        }

        let _guard = self.persist_lock.lock().await;
        if let Some(key) = self.cached_active(key_id)? {
            return Ok(Some(key));
        }
        let records = self.bounded(self.vault.load_key(key_id)).await?;
        let Some(record) = latest_active(&records) else {
            return Ok(None);
        };
        let key = self.unwrap_record(record.clone()).await?;
        self.cache_put(key.clone(), true)?;
        Ok(Some(key))
    }

    /// A specific key version, active or not.
    pub async fn get_version(&self, key_id: &str, version: u32) -> Result<Option<EncryptionKey>> {
        if let Some(key) = self.cached_version(key_id, version)? {
            return Ok(Some(key));
        }

        let _guard = self.persist_lock.lock().await;
        if let Some(key) = self.cached_version(key_id, version)? {
            return Ok(Some(key));
        }
        let records = self.bounded(self.vault.load_key(key_id)).await?;
        let Some(record) = records.into_iter().find(|r| r.version == version) else {
            return Ok(None);
        };
        let active = record.active;
        let key = self.unwrap_record(record).await?;
        self.cache_put(key.clone(), active)?;
        Ok(Some(key))
    }

    /// Every key id with stored material.
    pub async fn list_key_ids(&self) -> Result<Vec<String>> {
        self.bounded(self.vault.list_key_ids()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new version and make it the only active one.
    ///
    /// Earlier versions are kept (inactive) so their envelopes still open.
    pub async fn rotate(&self, key_id: &str) -> Result<EncryptionKey> {
        validate_key_id(key_id)?;
        let _guard = self.persist_lock.lock().await;
        let records = self.bounded(self.vault.load_key(key_id)).await?;
        self.rotate_locked(key_id, &records).await
    }

    /// Delete every version of a key.
    ///
    /// Destructive: envelopes referencing this key become permanently
    /// undecryptable. Re-encrypt affected values first. Returns the number
    /// of versions removed.
    pub async fn retire(&self, key_id: &str) -> Result<usize> {
        let _guard = self.persist_lock.lock().await;
        let removed = self.bounded(self.vault.delete_key(key_id)).await?;
        self.evict(key_id)?;
        tracing::warn!(key_id, versions = removed, "retired key");
        Ok(removed)
    }

    /// Drop a key from the in-process cache.
    pub fn evict(&self, key_id: &str) -> Result<()> {
        self.cache_write()?.remove(key_id);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Backup
    // ─────────────────────────────────────────────────────────────────────────

    /// Export every wrapped key record to a JSON file.
    ///
    /// Returns the number of records written.
    pub async fn backup_keys(&self, dest: impl AsRef<Path>) -> Result<usize> {
        let mut keys = Vec::new();
        for key_id in self.list_key_ids().await? {
            keys.extend(self.bounded(self.vault.load_key(&key_id)).await?);
        }
        let count = keys.len();
        let backup = KeyBackup {
            format: BACKUP_FORMAT,
            scope: self.protector.scope().to_string(),
            created_at: now_millis(),
            keys,
        };
        let json = serde_json::to_vec_pretty(&backup)
            .map_err(|e| KeyError::Serialization(e.to_string()))?;

        let dest: PathBuf = dest.as_ref().to_path_buf();
        self.blocking(move || write_private(&dest, &json)).await?;
        tracing::info!(records = count, "exported key backup");
        Ok(count)
    }

    /// Import wrapped key records from a JSON backup.
    ///
    /// Every record must unwrap under this manager's protector before any is
    /// stored. Versions already present are left untouched. Returns the
    /// number of records processed.
    pub async fn restore_keys(&self, src: impl AsRef<Path>) -> Result<usize> {
        let src: PathBuf = src.as_ref().to_path_buf();
        let bytes = self
            .blocking(move || {
                std::fs::read(&src)
                    .map_err(|e| KeyError::Storage(format!("read {}: {e}", src.display())))
            })
            .await?;
        let backup: KeyBackup =
            serde_json::from_slice(&bytes).map_err(|e| KeyError::Serialization(e.to_string()))?;
        if backup.format != BACKUP_FORMAT {
            return Err(KeyError::Serialization(format!(
                "unsupported backup format {}",
                backup.format
            )));
        }
        if backup.scope != self.protector.scope() {
            tracing::warn!(
                backup_scope = %backup.scope,
                "key backup was taken under a different protection scope"
            );
        }

        for record in &backup.keys {
            self.unwrap_record(record.clone()).await?;
        }

        let _guard = self.persist_lock.lock().await;
        for record in &backup.keys {
            self.bounded(self.vault.insert_version(record)).await?;
            self.evict(&record.key_id)?;
        }
        tracing::info!(records = backup.keys.len(), "restored key backup");
        Ok(backup.keys.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn rotate_locked(&self, key_id: &str, records: &[WrappedKeyRecord]) -> Result<EncryptionKey> {
        let next = records.iter().map(|r| r.version).max().unwrap_or(0) + 1;
        let key = self.create_version(key_id, next).await?;

        for record in records.iter().filter(|r| r.active && r.version != key.version) {
            self.bounded(self.vault.set_active(key_id, record.version, false))
                .await?;
        }
        {
            let mut cache = self.cache_write()?;
            if let Some(ring) = cache.get_mut(key_id) {
                for (version, cached) in ring.versions.iter_mut() {
                    cached.active = *version == key.version;
                }
            }
        }

        tracing::info!(key_id, version = key.version, "rotated key");
        Ok(key)
    }

    /// Generate, wrap and persist one version. Adopts the stored record if
    /// another writer got there first.
    async fn create_version(&self, key_id: &str, version: u32) -> Result<EncryptionKey> {
        let now = now_millis();
        let expires_at = self
            .config
            .key_ttl
            .map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)));
        let material = KeyMaterial::generate();

        let protector = self.protector.clone();
        let candidate = material.clone();
        let wrapped = self
            .blocking(move || protector.protect(candidate.as_bytes()))
            .await?;

        let record = WrappedKeyRecord {
            key_id: key_id.to_string(),
            version,
            wrapped,
            created_at: now,
            expires_at,
            active: true,
        };
        let stored = self.bounded(self.vault.insert_version(&record)).await?;

        let key = if stored.wrapped == record.wrapped {
            tracing::info!(key_id, version, "generated key");
            EncryptionKey::new(key_id, version, material, now, expires_at)
        } else {
            tracing::debug!(key_id, version, "lost key creation race, adopting stored key");
            self.unwrap_record(stored).await?
        };

        self.cache_put(key.clone(), true)?;
        Ok(key)
    }

    async fn unwrap_record(&self, record: WrappedKeyRecord) -> Result<EncryptionKey> {
        let protector = self.protector.clone();
        self.blocking(move || {
            let integrity = |reason: String| KeyError::Integrity {
                key_id: record.key_id.clone(),
                reason,
            };
            // A refusal to unwrap stays a protection error; only bad bytes are corrupt.
            let raw = protector.unprotect(&record.wrapped).map_err(|e| match e {
                KeyError::Integrity { reason, .. } => {
                    integrity(format!("version {}: {reason}", record.version))
                }
                other => other,
            })?;
            let material = KeyMaterial::from_slice(&raw).ok_or_else(|| {
                integrity(format!(
                    "version {} unwrapped to {} bytes",
                    record.version,
                    raw.len()
                ))
            })?;
            let mut key = EncryptionKey::new(
                record.key_id.clone(),
                record.version,
                material,
                record.created_at,
                record.expires_at,
            );
            key.active = record.active;
            Ok(key)
        })
        .await
    }

    /// Run a blocking closure off the async workers, bounded by the storage
    /// timeout. A timed-out closure keeps running to completion.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.config.storage_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(KeyError::Storage(format!("blocking task failed: {e}"))),
            Err(_) => Err(KeyError::Storage(format!(
                "key protection call exceeded {} ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = tillvault_store::Result<T>>,
    {
        let timeout = self.config.storage_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result.map_err(KeyError::from),
            Err(_) => Err(KeyError::Storage(format!(
                "key vault call exceeded {} ms",
                timeout.as_millis()
            ))),
        }
    }

    fn cached_active(&self, key_id: &str) -> Result<Option<EncryptionKey>> {
        let cache = self.cache_read()?;
        Ok(cache
            .get(key_id)
            .and_then(|ring| ring.active.and_then(|v| ring.versions.get(&v)))
            .cloned())
    }

    fn cached_version(&self, key_id: &str, version: u32) -> Result<Option<EncryptionKey>> {
        let cache = self.cache_read()?;
        Ok(cache
            .get(key_id)
            .and_then(|ring| ring.versions.get(&version))
            .cloned())
    }

    fn cache_put(&self, key: EncryptionKey, active: bool) -> Result<()> {
        let mut cache = self.cache_write()?;
        let ring = cache.entry(key.id.clone()).or_default();
        if active && ring.active.map_or(true, |v| v <= key.version) {
            ring.active = Some(key.version);
        }
        ring.versions.insert(key.version, key);
        Ok(())
    }

    fn cache_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, KeyRing>>> {
        self.cache
            .read()
            .map_err(|e| KeyError::Storage(format!("key cache poisoned: {e}")))
    }

    fn cache_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, KeyRing>>> {
        self.cache
            .write()
            .map_err(|e| KeyError::Storage(format!("key cache poisoned: {e}")))
    }
}

fn validate_key_id(key_id: &str) -> Result<()> {
    if key_id.trim().is_empty() || key_id.chars().any(char::is_control) {
        return Err(KeyError::WeakParameters(format!("invalid key id {key_id:?}")));
    }
    Ok(())
}

fn latest_active(records: &[WrappedKeyRecord]) -> Option<&WrappedKeyRecord> {
    records.iter().filter(|r| r.active).max_by_key(|r| r.version)
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(crate::protector::SECRET_FILE_MODE);
    }
    let mut file = options
        .open(path)
        .map_err(|e| KeyError::Storage(format!("create {}: {e}", path.display())))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| KeyError::Storage(format!("write {}: {e}", path.display())))
}
