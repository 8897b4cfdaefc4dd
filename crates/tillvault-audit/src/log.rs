//! The audit log.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tillvault_core::{now_millis, random_bytes, AuditEntry, AuditFilter, AuditOperation, Principal};
use tillvault_store::{AuditBackend, StoreError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::chain::{self, ChainReport};
use crate::error::{AuditError, Result};
use crate::mask::{Masker, DEFAULT_DENY_LIST};
use crate::retention::{RetentionPolicy, RetentionReport};

/// Audit log settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogConfig {
    pub retention: RetentionPolicy,
    /// Upper bound on any single backend call, in milliseconds.
    pub backend_timeout_ms: u64,
    /// Words masked out of free-text fields.
    pub deny_list: Vec<String>,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            backend_timeout_ms: 5_000,
            deny_list: DEFAULT_DENY_LIST.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl AuditLogConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

/// Append-only, masked, hash-chained record of store operations.
///
/// Appends are serialized so each entry links to the one actually written
/// before it. Entries can only be removed through [`AuditLog::purge`] (which
/// is itself recorded) and the retention pass.
pub struct AuditLog {
    backend: Arc<dyn AuditBackend>,
    masker: Masker,
    append_lock: Mutex<()>,
    config: AuditLogConfig,
}

impl AuditLog {
    pub fn new(backend: Arc<dyn AuditBackend>) -> Self {
        Self::with_config(backend, AuditLogConfig::default())
    }

    pub fn with_config(backend: Arc<dyn AuditBackend>, config: AuditLogConfig) -> Self {
        Self {
            backend,
            masker: Masker::new(&config.deny_list),
            append_lock: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &AuditLogConfig {
        &self.config
    }

    pub fn masker(&self) -> &Masker {
        &self.masker
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    /// Mask, chain and append one entry. Returns the entry as stored.
    pub async fn record(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        self.masker.mask_entry(&mut entry);
        if entry.id.is_empty() {
            entry.id = hex::encode(random_bytes::<16>());
        }

        let _guard = self.append_lock.lock().await;
        let prev = self.bounded(self.backend.last_entry()).await?;
        chain::seal(&mut entry, prev.and_then(|e| e.entry_hash))?;
        entry.seq = self.bounded(self.backend.append(&entry)).await?;

        tracing::trace!(
            seq = entry.seq,
            operation = %entry.operation,
            path = %entry.path,
            success = entry.success,
            "audit entry recorded"
        );
        Ok(entry)
    }

    /// Whether the backend is reachable. Mutating store operations refuse
    /// to proceed when this fails.
    pub async fn health_check(&self) -> Result<()> {
        self.bounded(self.backend.ping()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Entries matching `filter`, ordered by timestamp.
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.bounded(self.backend.query(filter)).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.bounded(self.backend.count()).await
    }

    /// Walk the retained entries and check every link.
    pub async fn verify_chain(&self) -> Result<ChainReport> {
        let entries = self.query(&AuditFilter::all()).await?;
        Ok(chain::verify_chain(&entries))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Removal
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove entries matching `filter` and record that `actor` did so.
    pub async fn purge(&self, filter: &AuditFilter, actor: &Principal) -> Result<usize> {
        let removed = {
            let _guard = self.append_lock.lock().await;
            self.bounded(self.backend.delete_matching(filter)).await?
        };

        let mut entry = AuditEntry::new(
            filter.path.clone().unwrap_or_else(|| "*".to_string()),
            AuditOperation::Purge,
            actor.as_str(),
        )
        .succeeded()
        .with_detail("removed", removed.to_string());
        if let Some(ref principal) = filter.principal {
            entry = entry.with_detail("filter_principal", principal.clone());
        }
        if let Some(operation) = filter.operation {
            entry = entry.with_detail("filter_operation", operation.as_str());
        }
        if let Some(from) = filter.from {
            entry = entry.with_detail("filter_from", from.to_string());
        }
        if let Some(to) = filter.to {
            entry = entry.with_detail("filter_to", to.to_string());
        }
        self.record(entry).await?;

        tracing::info!(actor = %actor, removed, "audit entries purged");
        Ok(removed)
    }

    /// Apply the retention policy once.
    pub async fn prune(&self) -> Result<RetentionReport> {
        let policy = &self.config.retention;
        if policy.is_keep_all() {
            return Ok(RetentionReport::default());
        }

        let _guard = self.append_lock.lock().await;
        let mut report = RetentionReport::default();
        if let Some(cutoff) = policy.cutoff(now_millis()) {
            report.expired = self.bounded(self.backend.delete_older_than(cutoff)).await?;
        }
        if let Some(keep) = policy.max_entries {
            report.overflow = self.bounded(self.backend.delete_oldest_beyond(keep)).await?;
        }

        if report.total() > 0 {
            tracing::info!(expired = report.expired, overflow = report.overflow, "audit log pruned");
        }
        Ok(report)
    }

    /// Run [`AuditLog::prune`] every `interval` until the handle is aborted.
    pub fn spawn_retention(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune().await {
                    tracing::warn!(error = %e, "audit retention pass failed");
                }
            }
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = tillvault_store::Result<T>>,
    {
        let timeout = self.config.backend_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result.map_err(AuditError::from),
            Err(_) => Err(AuditError::Backend(StoreError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillvault_store::MemoryStore;

    fn log() -> (Arc<MemoryStore>, AuditLog) {
        let store = Arc::new(MemoryStore::new());
        let log = AuditLog::new(store.clone());
        (store, log)
    }

    fn entry(path: &str, op: AuditOperation, who: &str) -> AuditEntry {
        AuditEntry::new(path, op, who).succeeded()
    }

    #[tokio::test]
    async fn test_record_assigns_id_seq_and_chain() {
        let (_, log) = log();
        let first = log.record(entry(r"config\a", AuditOperation::SetValue, "admin")).await.unwrap();
        let second = log.record(entry(r"config\b", AuditOperation::GetValue, "admin")).await.unwrap();

        assert!(!first.id.is_empty());
        assert_ne!(first.id, second.id);
        assert!(second.seq > first.seq);
        assert_eq!(second.prev_hash, first.entry_hash);
        assert!(log.verify_chain().await.unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_record_masks_before_storing() {
        let (_, log) = log();
        log.record(
            AuditEntry::new(r"config\db", AuditOperation::SetValue, "admin")
                .failed("rejected: Password=letmein")
                .with_detail("api_key", "abc"),
        )
        .await
        .unwrap();

        let stored = log.query(&AuditFilter::all()).await.unwrap();
        let error = stored[0].error.clone().unwrap();
        assert!(!error.contains("letmein"));
        assert!(!error.to_ascii_lowercase().contains("password"));
        assert!(stored[0].details.values().all(|v| v != "abc"));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let (_, log) = log();
        log.record(entry(r"config\a", AuditOperation::SetValue, "alice")).await.unwrap();
        log.record(entry(r"config\a", AuditOperation::GetValue, "bob")).await.unwrap();
        log.record(entry(r"config\b", AuditOperation::GetValue, "alice")).await.unwrap();

        let alice = log.query(&AuditFilter::all().principal("alice")).await.unwrap();
        assert_eq!(alice.len(), 2);
        let reads_a = log
            .query(&AuditFilter::all().path(r"config\a").operation(AuditOperation::GetValue))
            .await
            .unwrap();
        assert_eq!(reads_a.len(), 1);
        assert_eq!(reads_a[0].principal, "bob");
    }

    #[tokio::test]
    async fn test_purge_is_recorded() {
        let (_, log) = log();
        for _ in 0..3 {
            log.record(entry(r"config\a", AuditOperation::GetValue, "alice")).await.unwrap();
        }
        let removed = log
            .purge(&AuditFilter::all().principal("alice"), &"auditor".into())
            .await
            .unwrap();
        assert_eq!(removed, 3);

        let remaining = log.query(&AuditFilter::all()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].operation, AuditOperation::Purge);
        assert_eq!(remaining[0].principal, "auditor");
        assert_eq!(remaining[0].details.get("removed").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_prune_by_count_keeps_chain_verifiable() {
        let store = Arc::new(MemoryStore::new());
        let config = AuditLogConfig {
            retention: RetentionPolicy::keep_all().max_entries(3),
            ..AuditLogConfig::default()
        };
        let log = AuditLog::with_config(store, config);
        for i in 0..5 {
            log.record(entry(&format!(r"config\v{i}"), AuditOperation::SetValue, "admin"))
                .await
                .unwrap();
        }

        let report = log.prune().await.unwrap();
        assert_eq!(report.overflow, 2);
        assert_eq!(log.count().await.unwrap(), 3);
        assert!(log.verify_chain().await.unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let store = Arc::new(MemoryStore::new());
        let config = AuditLogConfig {
            retention: RetentionPolicy::keep_all().max_age(Duration::from_secs(3600)),
            ..AuditLogConfig::default()
        };
        let log = AuditLog::with_config(store, config);

        let mut old = entry(r"config\old", AuditOperation::SetValue, "admin");
        old.timestamp = now_millis() - 2 * 3_600_000;
        log.record(old).await.unwrap();
        log.record(entry(r"config\new", AuditOperation::SetValue, "admin")).await.unwrap();

        let report = log.prune().await.unwrap();
        assert_eq!(report.expired, 1);
        let left = log.query(&AuditFilter::all()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].path, r"config\new");
    }

    #[tokio::test]
    async fn test_concurrent_records_stay_linked() {
        let (_, log) = log();
        let log = Arc::new(log);
        let mut handles = Vec::new();
        for i in 0..16 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.record(entry(&format!(r"config\c{i}"), AuditOperation::SetValue, "admin"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let report = log.verify_chain().await.unwrap();
        assert_eq!(report.checked, 16);
        assert!(report.is_intact());
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_, log) = log();
        log.health_check().await.unwrap();
    }
}
