//! The secure configuration store.
//!
//! Every public operation runs the same call chain:
//!
//! ```text
//! resolve ─► admit ─► lock ─► apply ─► finish
//!            │                          │
//!            ├ audit health (mutations) ├ record success
//!            ├ CreateContainer if new   └ roll back a mutation whose
//!            └ permission gate            audit record was not written
//! ```
//!
//! Any failure after `resolve` starts is recorded as a failed audit entry
//! before it is returned, unless the audit backend is what failed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tillvault_audit::AuditLog;
use tillvault_core::{AuditEntry, AuditOperation, ConfigPath, PathResolver, Principal, Right, RightSet};
use tillvault_keys::{EncryptionEngine, KeyManager, KeyProtector};
use tillvault_perms::{AccessPolicy, PermissionGate};
use tillvault_store::{AuditBackend, BackingStore, Children, KeyVault};
use tokio::task::JoinHandle;

use crate::config::StoreConfig;
use crate::error::{ConfigStoreError, Result};
use crate::locks::PathLocks;
use crate::task::OperationHandle;
use crate::value::{blob_digest, Protection, StoredValue};

/// A read result, with a warning when its audit record could not be
/// written (reads fail open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed<T> {
    pub value: T,
    pub audit_warning: Option<String>,
}

impl<T> Observed<T> {
    fn audited(value: T) -> Self {
        Self {
            value,
            audit_warning: None,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn is_audited(&self) -> bool {
        self.audit_warning.is_none()
    }
}

/// Outcome of one item in a batch or tree operation.
#[derive(Debug)]
pub struct BatchItem<T> {
    pub path: String,
    pub result: Result<T>,
}

impl<T> BatchItem<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Clone, Copy)]
enum PathKind {
    Value,
    Container,
}

/// How to reverse an applied mutation.
enum Undo {
    Restore(ConfigPath, Bytes),
    Remove(ConfigPath),
}

/// What an operation body did, for the audit entry.
struct Applied<T> {
    value: T,
    old_digest: Option<String>,
    new_digest: Option<String>,
    details: Vec<(&'static str, String)>,
    undo: Option<Undo>,
}

impl<T> Applied<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            old_digest: None,
            new_digest: None,
            details: Vec::new(),
            undo: None,
        }
    }

    fn old_digest(mut self, digest: Option<String>) -> Self {
        self.old_digest = digest;
        self
    }

    fn new_digest(mut self, digest: String) -> Self {
        self.new_digest = Some(digest);
        self
    }

    fn detail(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.details.push((name, value.into()));
        self
    }

    fn undo(mut self, undo: Undo) -> Self {
        self.undo = Some(undo);
        self
    }
}

/// Hierarchical configuration store with encryption, permission checks and
/// auditing on every call.
///
/// Owns the backing store handle, the key manager (through its engine), the
/// permission gate and the audit log; none of them are constructed ad hoc.
pub struct SecureConfigStore<S: BackingStore> {
    backend: Arc<S>,
    engine: EncryptionEngine,
    gate: PermissionGate,
    audit: Arc<AuditLog>,
    resolver: PathResolver,
    locks: PathLocks,
    config: StoreConfig,
}

impl<S> SecureConfigStore<S>
where
    S: BackingStore + KeyVault + AuditBackend + 'static,
{
    /// Wire a store whose backend also holds the key vault and audit log.
    pub fn open(
        backend: Arc<S>,
        protector: Arc<dyn KeyProtector>,
        policy: Arc<dyn AccessPolicy>,
        config: StoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        let keys = Arc::new(KeyManager::with_config(
            backend.clone(),
            protector,
            config.key_manager_config(),
        ));
        let audit = Arc::new(AuditLog::with_config(backend.clone(), config.audit_log_config()));
        Ok(Self::new(backend, keys, policy, audit, config))
    }
}

impl<S: BackingStore> SecureConfigStore<S> {
    pub fn new(
        backend: Arc<S>,
        keys: Arc<KeyManager>,
        policy: Arc<dyn AccessPolicy>,
        audit: Arc<AuditLog>,
        config: StoreConfig,
    ) -> Self {
        Self {
            backend,
            engine: EncryptionEngine::new(keys),
            gate: PermissionGate::new(policy),
            audit,
            resolver: config.resolver(),
            locks: PathLocks::new(),
            config,
        }
    }

    pub fn backend(&self) -> &Arc<S> {
        &self.backend
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        self.engine.keys()
    }

    pub fn engine(&self) -> &EncryptionEngine {
        &self.engine
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Start the background audit retention pass.
    pub fn spawn_retention(&self) -> JoinHandle<()> {
        Arc::clone(&self.audit).spawn_retention(self.config.retention.interval())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Read and decrypt a value. `None` if nothing is stored at the path.
    pub async fn get_value(&self, principal: &Principal, raw: &str) -> Result<Observed<Option<String>>> {
        let op = AuditOperation::GetValue;
        let path = self.resolve(principal, raw, op, PathKind::Value).await?;
        let entry = self.admit(principal, &path, op, Right::Read.into()).await?;

        let _guard = self.locks.read(&path).await;
        let applied = self.apply_get(&path).await;
        self.finish(entry, applied).await
    }

    pub async fn value_exists(&self, principal: &Principal, raw: &str) -> Result<Observed<bool>> {
        let op = AuditOperation::ValueExists;
        let path = self.resolve(principal, raw, op, PathKind::Value).await?;
        let entry = self.admit(principal, &path, op, Right::Read.into()).await?;

        let _guard = self.locks.read(&path).await;
        let applied = self.apply_exists(&path).await;
        self.finish(entry, applied).await
    }

    /// Names of the containers and values directly under a container.
    /// `None` if the container does not exist.
    pub async fn list_children(
        &self,
        principal: &Principal,
        raw: &str,
    ) -> Result<Observed<Option<Children>>> {
        let op = AuditOperation::ListChildren;
        let container = self.resolve(principal, raw, op, PathKind::Container).await?;
        let entry = self.admit(principal, &container, op, Right::Read.into()).await?;

        let _guard = self.locks.read(&container).await;
        let applied = self.apply_list(&container).await;
        self.finish(entry, applied).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a value, encrypted unless the store is configured otherwise.
    pub async fn set_value(&self, principal: &Principal, raw: &str, value: &str) -> Result<()> {
        let protection = if self.config.encrypt_by_default {
            Protection::Encrypted
        } else {
            Protection::Plain
        };
        self.set_value_with(principal, raw, value, protection).await
    }

    /// Store a value with explicit protection.
    ///
    /// Writing into a container that does not exist yet also requires
    /// `CreateContainer` on its parent.
    pub async fn set_value_with(
        &self,
        principal: &Principal,
        raw: &str,
        value: &str,
        protection: Protection,
    ) -> Result<()> {
        let op = AuditOperation::SetValue;
        let path = self.resolve(principal, raw, op, PathKind::Value).await?;
        let entry = self.admit(principal, &path, op, Right::Write.into()).await?;

        let _guard = self.locks.write(&path).await;
        let applied = self.apply_set(&path, value, protection).await;
        self.finish(entry, applied).await.map(Observed::into_inner)
    }

    /// Remove a value. Returns whether anything was stored.
    pub async fn delete_value(&self, principal: &Principal, raw: &str) -> Result<bool> {
        let path = self
            .resolve(principal, raw, AuditOperation::DeleteValue, PathKind::Value)
            .await?;
        self.delete_value_at(principal, &path).await
    }

    /// Decrypt a value and seal it again under the active version of its
    /// key. Plain values become encrypted under the default key.
    ///
    /// Run this over every value sealed with a key before retiring it.
    pub async fn reencrypt_value(&self, principal: &Principal, raw: &str) -> Result<()> {
        let op = AuditOperation::ReEncrypt;
        let path = self.resolve(principal, raw, op, PathKind::Value).await?;
        let entry = self.admit(principal, &path, op, Right::Write.into()).await?;

        let _guard = self.locks.write(&path).await;
        let applied = self.apply_reencrypt(&path).await;
        self.finish(entry, applied).await.map(Observed::into_inner)
    }

    /// Remove a container and everything below it.
    ///
    /// Post-order: each value deletion and each container removal runs the
    /// full pipeline (gate + audit) on its own. A denied item stays, and so
    /// do its ancestors. Root containers are never removed.
    ///
    /// The outer error covers the tree as a whole (bad path, denied at the
    /// top, audit backend down, traversal failure); per-item outcomes are in
    /// the returned list.
    pub async fn delete_tree(&self, principal: &Principal, raw: &str) -> Result<Vec<BatchItem<bool>>> {
        let op = AuditOperation::DeleteContainer;
        let top = self.resolve(principal, raw, op, PathKind::Container).await?;

        if top.is_root() {
            let err = ConfigStoreError::InvalidInput(format!("root container {top} cannot be deleted"));
            self.record_failure(AuditEntry::new(top.to_string(), op, principal.as_str()), &err)
                .await;
            return Err(err);
        }
        let entry = self.admit(principal, &top, op, Right::Delete.into()).await?;

        let tree = match self.collect_tree(&top).await {
            Ok(tree) => tree,
            Err(err) => {
                self.record_failure(entry, &err).await;
                return Err(err);
            }
        };

        let mut report = Vec::new();
        for (container, values) in tree.iter().rev() {
            for name in values {
                let item = match self.resolver.join_value(container, name) {
                    Ok(path) => BatchItem {
                        path: path.to_string(),
                        result: self.delete_value_at(principal, &path).await,
                    },
                    Err(e) => BatchItem {
                        path: format!("{container}\\{name}"),
                        result: Err(e.into()),
                    },
                };
                report.push(item);
            }
            report.push(BatchItem {
                path: container.to_string(),
                result: self.delete_container_at(principal, container).await,
            });
        }

        let failed = report.iter().filter(|item| !item.is_ok()).count();
        tracing::info!(
            path = %top,
            principal = %principal,
            items = report.len(),
            failed,
            "tree delete finished"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batches
    // ─────────────────────────────────────────────────────────────────────────
    //
    // Each item is its own transaction: one item's failure never stops the
    // rest, and nothing is rolled back across items.

    pub async fn get_values(
        &self,
        principal: &Principal,
        raws: &[&str],
    ) -> Vec<BatchItem<Observed<Option<String>>>> {
        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            out.push(BatchItem {
                path: raw.to_string(),
                result: self.get_value(principal, raw).await,
            });
        }
        out
    }

    pub async fn set_values(&self, principal: &Principal, items: &[(&str, &str)]) -> Vec<BatchItem<()>> {
        let mut out = Vec::with_capacity(items.len());
        for (raw, value) in items {
            out.push(BatchItem {
                path: raw.to_string(),
                result: self.set_value(principal, raw, value).await,
            });
        }
        out
    }

    pub async fn delete_values(&self, principal: &Principal, raws: &[&str]) -> Vec<BatchItem<bool>> {
        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            out.push(BatchItem {
                path: raw.to_string(),
                result: self.delete_value(principal, raw).await,
            });
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────────

    async fn resolve(
        &self,
        principal: &Principal,
        raw: &str,
        operation: AuditOperation,
        kind: PathKind,
    ) -> Result<ConfigPath> {
        let resolved = match kind {
            PathKind::Value => self.resolver.resolve(raw),
            PathKind::Container => self.resolver.resolve_container(raw),
        };
        let err = match resolved {
            Ok(path) if matches!(kind, PathKind::Container) || path.is_value() => return Ok(path),
            Ok(path) => ConfigStoreError::InvalidInput(format!("{path} names a container, not a value")),
            Err(e) => ConfigStoreError::Parse(e),
        };
        self.record_failure(AuditEntry::new(raw.trim(), operation, principal.as_str()), &err)
            .await;
        Err(err)
    }

    /// Everything that must pass before an operation touches storage.
    /// Returns the audit entry to complete.
    async fn admit(
        &self,
        principal: &Principal,
        path: &ConfigPath,
        operation: AuditOperation,
        required: RightSet,
    ) -> Result<AuditEntry> {
        let entry = AuditEntry::new(path.to_string(), operation, principal.as_str());

        // Fail closed: no mutation without a working audit trail.
        if operation.is_mutation() {
            if let Err(e) = self.audit.health_check().await {
                tracing::warn!(
                    path = %path,
                    operation = %operation,
                    error = %e,
                    "audit backend unavailable, refusing mutation"
                );
                return Err(ConfigStoreError::Storage(format!("audit backend unavailable: {e}")));
            }
        }

        let mut required = required;
        if operation == AuditOperation::SetValue {
            let container = path.container();
            let exists = self
                .attempt("container_exists", || self.backend.container_exists(&container))
                .await;
            match exists {
                Ok(true) => {}
                Ok(false) => required = required.with(Right::CreateContainer),
                Err(err) => {
                    self.record_failure(entry, &err).await;
                    return Err(err);
                }
            }
        }

        let check = self.gate.check(principal, path, required);
        if !check.granted {
            let mut entry = entry;
            if let Some(code) = check.code {
                entry = entry.with_detail("denial", code.as_str());
            }
            let err = ConfigStoreError::PermissionDenied {
                missing: check.missing,
                reason: check.reason,
            };
            self.record_failure(entry, &err).await;
            return Err(err);
        }

        Ok(entry)
    }

    /// Record the outcome. A mutation whose success cannot be recorded is
    /// undone and reported as a storage failure; a read is returned with a
    /// warning instead.
    async fn finish<T>(&self, entry: AuditEntry, applied: Result<Applied<T>>) -> Result<Observed<T>> {
        let applied = match applied {
            Ok(applied) => applied,
            Err(err) => {
                self.record_failure(entry, &err).await;
                return Err(err);
            }
        };

        let operation = entry.operation;
        let path = entry.path.clone();
        let mut entry = entry.succeeded();
        entry.old_digest = applied.old_digest;
        entry.new_digest = applied.new_digest;
        for (name, value) in applied.details {
            entry.details.insert(name.to_string(), value);
        }

        match self.audit.record(entry).await {
            Ok(recorded) => {
                tracing::debug!(
                    path = %path,
                    operation = %operation,
                    principal = %recorded.principal,
                    "operation completed"
                );
                Ok(Observed::audited(applied.value))
            }
            Err(e) if operation.is_mutation() => {
                tracing::warn!(
                    path = %path,
                    operation = %operation,
                    error = %e,
                    "audit record not written, rolling back"
                );
                if let Some(undo) = applied.undo {
                    if let Err(undo_err) = self.undo(undo).await {
                        tracing::error!(path = %path, error = %undo_err, "rollback failed");
                        return Err(ConfigStoreError::Integrity(format!(
                            "audit record not written and rollback failed for {path}: {undo_err}"
                        )));
                    }
                }
                Err(ConfigStoreError::Storage(format!(
                    "audit record not written, change rolled back: {e}"
                )))
            }
            Err(e) => {
                tracing::warn!(
                    path = %path,
                    operation = %operation,
                    error = %e,
                    "audit record not written, serving read anyway"
                );
                Ok(Observed {
                    value: applied.value,
                    audit_warning: Some(format!("audit record not written: {e}")),
                })
            }
        }
    }

    async fn record_failure(&self, entry: AuditEntry, err: &ConfigStoreError) {
        let path = entry.path.clone();
        let entry = entry.failed(err.to_string()).with_detail("error_kind", err.kind());
        if let Err(e) = self.audit.record(entry).await {
            tracing::warn!(path = %path, error = %e, "failed operation could not be audited");
        }
    }

    /// Run a storage call with a time bound, retrying transient failures
    /// with exponential backoff.
    async fn attempt<T, E, F, Fut>(&self, call: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ConfigStoreError>,
    {
        let timeout = self.config.storage_timeout();
        let retry = &self.config.retry;
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(ConfigStoreError::Storage(format!(
                    "{call} exceeded {} ms",
                    timeout.as_millis()
                ))),
            };
            match result {
                Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                    let backoff = retry.backoff(attempt);
                    tracing::warn!(
                        call,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn undo(&self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Restore(path, blob) => {
                self.attempt("raw_set", || self.backend.raw_set(&path, blob.clone()))
                    .await
            }
            Undo::Remove(path) => self
                .attempt("raw_delete", || self.backend.raw_delete(&path))
                .await
                .map(|_| ()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operation bodies
    // ─────────────────────────────────────────────────────────────────────────

    async fn load(&self, path: &ConfigPath) -> Result<Option<Bytes>> {
        self.attempt("raw_get", || self.backend.raw_get(path)).await
    }

    async fn apply_get(&self, path: &ConfigPath) -> Result<Applied<Option<String>>> {
        let Some(blob) = self.load(path).await? else {
            return Ok(Applied::new(None));
        };
        let stored = StoredValue::from_bytes(&blob)?;
        let protection = stored.protection();
        let text = self.open_stored(stored).await?;
        Ok(Applied::new(Some(text))
            .old_digest(Some(blob_digest(&blob)))
            .detail("protection", protection.as_str()))
    }

    async fn apply_exists(&self, path: &ConfigPath) -> Result<Applied<bool>> {
        let exists = self.load(path).await?.is_some();
        Ok(Applied::new(exists).detail("exists", exists.to_string()))
    }

    async fn apply_list(&self, container: &ConfigPath) -> Result<Applied<Option<Children>>> {
        let children = self
            .attempt("raw_list_children", || self.backend.raw_list_children(container))
            .await?;
        let count = children
            .as_ref()
            .map_or(0, |c| c.containers.len() + c.values.len());
        Ok(Applied::new(children).detail("children", count.to_string()))
    }

    async fn apply_set(
        &self,
        path: &ConfigPath,
        value: &str,
        protection: Protection,
    ) -> Result<Applied<()>> {
        if value.len() > self.config.max_value_size {
            return Err(ConfigStoreError::InvalidInput(format!(
                "value of {} bytes exceeds the {} byte limit",
                value.len(),
                self.config.max_value_size
            )));
        }

        let old = self.load(path).await?;
        let (blob, sealed_with) = self.seal(value, protection, &self.config.default_key_id).await?;
        let new_digest = blob_digest(&blob);
        self.attempt("raw_set", || self.backend.raw_set(path, blob.clone()))
            .await?;

        let mut applied = Applied::new(())
            .old_digest(old.as_deref().map(blob_digest))
            .new_digest(new_digest)
            .detail("protection", protection.as_str());
        if let Some(sealed_with) = sealed_with {
            applied = applied.detail("sealed_with", sealed_with);
        }
        Ok(applied.undo(match old {
            Some(previous) => Undo::Restore(path.clone(), previous),
            None => Undo::Remove(path.clone()),
        }))
    }

    async fn apply_delete(&self, path: &ConfigPath) -> Result<Applied<bool>> {
        let Some(old) = self.load(path).await? else {
            return Ok(Applied::new(false));
        };
        self.attempt("raw_delete", || self.backend.raw_delete(path))
            .await?;
        Ok(Applied::new(true)
            .old_digest(Some(blob_digest(&old)))
            .undo(Undo::Restore(path.clone(), old)))
    }

    async fn apply_reencrypt(&self, path: &ConfigPath) -> Result<Applied<()>> {
        let Some(old) = self.load(path).await? else {
            return Err(ConfigStoreError::InvalidInput(format!("no value stored at {path}")));
        };
        let stored = StoredValue::from_bytes(&old)?;
        let key_id = match &stored {
            StoredValue::Encrypted(envelope) => envelope.key_id.clone(),
            StoredValue::Plain(_) => self.config.default_key_id.clone(),
        };
        let text = self.open_stored(stored).await?;
        let (blob, sealed_with) = self.seal(&text, Protection::Encrypted, &key_id).await?;
        let new_digest = blob_digest(&blob);
        self.attempt("raw_set", || self.backend.raw_set(path, blob.clone()))
            .await?;

        let mut applied = Applied::new(())
            .old_digest(Some(blob_digest(&old)))
            .new_digest(new_digest);
        if let Some(sealed_with) = sealed_with {
            applied = applied.detail("sealed_with", sealed_with);
        }
        Ok(applied.undo(Undo::Restore(path.clone(), old)))
    }

    async fn apply_delete_container(&self, container: &ConfigPath) -> Result<Applied<bool>> {
        let removed = self
            .attempt("raw_delete_container", || self.backend.raw_delete_container(container))
            .await?;
        Ok(Applied::new(removed))
    }

    async fn delete_value_at(&self, principal: &Principal, path: &ConfigPath) -> Result<bool> {
        let entry = self
            .admit(principal, path, AuditOperation::DeleteValue, Right::Delete.into())
            .await?;

        let _guard = self.locks.write(path).await;
        let applied = self.apply_delete(path).await;
        self.finish(entry, applied).await.map(Observed::into_inner)
    }

    async fn delete_container_at(&self, principal: &Principal, container: &ConfigPath) -> Result<bool> {
        let entry = self
            .admit(principal, container, AuditOperation::DeleteContainer, Right::Delete.into())
            .await?;

        let _guard = self.locks.write(container).await;
        let applied = self.apply_delete_container(container).await;
        self.finish(entry, applied).await.map(Observed::into_inner)
    }

    /// Containers under (and including) `top` in breadth-first order, each
    /// with its value names.
    async fn collect_tree(&self, top: &ConfigPath) -> Result<Vec<(ConfigPath, Vec<String>)>> {
        let mut tree: Vec<(ConfigPath, Vec<String>)> = Vec::new();
        let mut pending = VecDeque::from([top.clone()]);
        while let Some(container) = pending.pop_front() {
            let children = self
                .attempt("raw_list_children", || self.backend.raw_list_children(&container))
                .await?
                .unwrap_or_default();
            for name in &children.containers {
                pending.push_back(self.resolver.join_container(&container, name)?);
            }
            tree.push((container, children.values));
        }
        Ok(tree)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sealing
    // ─────────────────────────────────────────────────────────────────────────

    /// Encode a value for storage. Returns the blob and, when encrypted,
    /// the key id and version it was sealed with.
    async fn seal(
        &self,
        value: &str,
        protection: Protection,
        key_id: &str,
    ) -> Result<(Bytes, Option<String>)> {
        let (stored, sealed_with) = match protection {
            Protection::Plain => (StoredValue::Plain(value.to_string()), None),
            Protection::Encrypted => {
                let envelope = self
                    .attempt("encrypt", || self.engine.encrypt(value.as_bytes(), key_id))
                    .await?;
                let sealed_with = format!("{} v{}", envelope.key_id, envelope.key_version);
                (StoredValue::Encrypted(envelope), Some(sealed_with))
            }
        };
        Ok((Bytes::from(stored.to_bytes()?), sealed_with))
    }

    async fn open_stored(&self, stored: StoredValue) -> Result<String> {
        match stored {
            StoredValue::Plain(text) => Ok(text),
            StoredValue::Encrypted(envelope) => {
                let plaintext = self
                    .attempt("decrypt", || self.engine.decrypt(&envelope))
                    .await?;
                std::str::from_utf8(&plaintext)
                    .map(str::to_owned)
                    .map_err(|_| ConfigStoreError::Integrity("decrypted value is not UTF-8".into()))
            }
        }
    }
}

impl<S: BackingStore + 'static> SecureConfigStore<S> {
    /// Run an operation as its own task.
    ///
    /// ```rust,ignore
    /// let handle = store.spawn(move |s| async move { s.get_value(&who, r"config\db\main").await });
    /// let value = handle.join().await?;
    /// ```
    pub fn spawn<T, F, Fut>(self: &Arc<Self>, op: F) -> OperationHandle<T>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        OperationHandle::new(tokio::spawn(op(Arc::clone(self))))
    }
}
