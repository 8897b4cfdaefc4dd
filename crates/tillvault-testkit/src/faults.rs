//! Backends that fail on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tillvault_core::{AuditEntry, AuditFilter, ConfigPath};
use tillvault_store::{AuditBackend, BackingStore, Children, MemoryStore, Result, StoreError};

/// An audit backend that can be taken down.
///
/// `set_down(true)` fails every call, health checks included. With
/// `fail_appends(true)` health checks pass but records are refused, which
/// is what a backend that dies mid-operation looks like.
#[derive(Default)]
pub struct FlakyAudit {
    inner: MemoryStore,
    down: AtomicBool,
    appends_fail: AtomicBool,
}

impl FlakyAudit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_appends(&self, fail: bool) {
        self.appends_fail.store(fail, Ordering::SeqCst);
    }

    /// Entries recorded so far, bypassing the failure switches.
    pub async fn recorded(&self) -> Vec<AuditEntry> {
        self.inner.query(&AuditFilter::all()).await.unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit backend is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditBackend for FlakyAudit {
    async fn append(&self, entry: &AuditEntry) -> Result<u64> {
        self.check()?;
        if self.appends_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit append refused".into()));
        }
        self.inner.append(entry).await
    }

    async fn last_entry(&self) -> Result<Option<AuditEntry>> {
        self.check()?;
        self.inner.last_entry().await
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.check()?;
        self.inner.query(filter).await
    }

    async fn delete_matching(&self, filter: &AuditFilter) -> Result<usize> {
        self.check()?;
        self.inner.delete_matching(filter).await
    }

    async fn delete_older_than(&self, cutoff: i64) -> Result<usize> {
        self.check()?;
        self.inner.delete_older_than(cutoff).await
    }

    async fn delete_oldest_beyond(&self, keep: usize) -> Result<usize> {
        self.check()?;
        self.inner.delete_oldest_beyond(keep).await
    }

    async fn count(&self) -> Result<usize> {
        self.check()?;
        self.inner.count().await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// A value backend whose next `n` calls fail with a transient error.
pub struct FlakyBackend<S> {
    inner: S,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl<S: BackingStore> FlakyBackend<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` calls, of any kind.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Calls seen so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: BackingStore> BackingStore for FlakyBackend<S> {
    async fn raw_get(&self, path: &ConfigPath) -> Result<Option<Bytes>> {
        self.check()?;
        self.inner.raw_get(path).await
    }

    async fn raw_set(&self, path: &ConfigPath, blob: Bytes) -> Result<()> {
        self.check()?;
        self.inner.raw_set(path, blob).await
    }

    async fn raw_delete(&self, path: &ConfigPath) -> Result<bool> {
        self.check()?;
        self.inner.raw_delete(path).await
    }

    async fn raw_list_children(&self, container: &ConfigPath) -> Result<Option<Children>> {
        self.check()?;
        self.inner.raw_list_children(container).await
    }

    async fn container_exists(&self, container: &ConfigPath) -> Result<bool> {
        self.check()?;
        self.inner.container_exists(container).await
    }

    async fn raw_delete_container(&self, container: &ConfigPath) -> Result<bool> {
        self.check()?;
        self.inner.raw_delete_container(container).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillvault_core::{AuditOperation, PathResolver};

    #[tokio::test]
    async fn test_flaky_backend_recovers() {
        let backend = FlakyBackend::new(MemoryStore::new());
        let path = PathResolver::default().resolve(r"config\a\v").unwrap();
        backend.fail_next(2);
        assert!(backend.raw_get(&path).await.is_err());
        assert!(backend.raw_get(&path).await.is_err());
        assert!(backend.raw_get(&path).await.unwrap().is_none());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_flaky_audit_switches() {
        let audit = FlakyAudit::new();
        let entry = AuditEntry::new(r"config\a\v", AuditOperation::GetValue, "admin");

        audit.fail_appends(true);
        assert!(audit.ping().await.is_ok());
        assert!(audit.append(&entry).await.is_err());

        audit.fail_appends(false);
        audit.set_down(true);
        assert!(audit.ping().await.is_err());

        audit.set_down(false);
        audit.append(&entry).await.unwrap();
        assert_eq!(audit.recorded().await.len(), 1);
    }
}
