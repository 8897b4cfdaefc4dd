//! Cross-crate scenarios: audit outages, transient storage failures,
//! retention and configuration loading.

use std::io::Write;
use std::sync::Arc;

use tillvault::audit::AuditLog;
use tillvault::core::{AuditFilter, AuditOperation};
use tillvault::keys::{KeyManager, MachineKeyProtector};
use tillvault::store::MemoryStore;
use tillvault::{ConfigStoreError, Principal, SecureConfigStore, StoreConfig};
use tillvault_testkit::fixtures::{standard_acl, FIXTURE_SCOPE, FIXTURE_SECRET};
use tillvault_testkit::{FlakyAudit, FlakyBackend, TestFixture};

const DB_MAIN: &str = r"config\db\main";

// ─────────────────────────────────────────────────────────────────────────────
// Audit outages
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mutations_refused_while_audit_down() {
    let audit = FlakyAudit::new();
    let fx = TestFixture::with_audit_backend(audit.clone());
    fx.store.set_value(&fx.admin, DB_MAIN, "v1").await.unwrap();

    audit.set_down(true);
    let err = fx.store.set_value(&fx.admin, DB_MAIN, "v2").await.unwrap_err();
    assert!(matches!(err, ConfigStoreError::Storage(_)), "{err:?}");
    let err = fx.store.delete_value(&fx.admin, DB_MAIN).await.unwrap_err();
    assert!(matches!(err, ConfigStoreError::Storage(_)), "{err:?}");

    audit.set_down(false);
    let read = fx.store.get_value(&fx.admin, DB_MAIN).await.unwrap();
    assert_eq!(read.into_inner().as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_reads_served_with_warning_while_audit_down() {
    let audit = FlakyAudit::new();
    let fx = TestFixture::with_audit_backend(audit.clone());
    fx.store.set_value(&fx.writer, DB_MAIN, "v1").await.unwrap();

    audit.set_down(true);
    let read = fx.store.get_value(&fx.reader, DB_MAIN).await.unwrap();
    assert!(!read.is_audited());
    assert!(read.audit_warning.as_deref().unwrap().contains("audit record not written"));
    assert_eq!(read.into_inner().as_deref(), Some("v1"));

    // Permission checks still apply.
    let err = fx.store.get_value(&fx.nobody, DB_MAIN).await.unwrap_err();
    assert!(matches!(err, ConfigStoreError::PermissionDenied { .. }));
}

#[tokio::test]
async fn test_unrecorded_write_is_rolled_back() {
    let audit = FlakyAudit::new();
    let fx = TestFixture::with_audit_backend(audit.clone());
    fx.store.set_value(&fx.admin, DB_MAIN, "original").await.unwrap();

    audit.fail_appends(true);
    let err = fx.store.set_value(&fx.admin, DB_MAIN, "replacement").await.unwrap_err();
    assert!(err.to_string().contains("rolled back"), "{err}");
    let err = fx
        .store
        .set_value(&fx.admin, r"config\db\fresh", "new")
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigStoreError::Storage(_)));
    let err = fx.store.delete_value(&fx.admin, DB_MAIN).await.unwrap_err();
    assert!(matches!(err, ConfigStoreError::Storage(_)));

    audit.fail_appends(false);
    let read = fx.store.get_value(&fx.admin, DB_MAIN).await.unwrap();
    assert_eq!(read.into_inner().as_deref(), Some("original"));
    let fresh = fx.store.get_value(&fx.admin, r"config\db\fresh").await.unwrap();
    assert_eq!(fresh.into_inner(), None);

    // Only the first write and the two reads ever reached the log.
    let recorded = audit.recorded().await;
    assert_eq!(recorded.len(), 3);
    assert_eq!(recorded[0].operation, AuditOperation::SetValue);
}

// ─────────────────────────────────────────────────────────────────────────────
// Transient storage failures
// ─────────────────────────────────────────────────────────────────────────────

type FlakyStore = SecureConfigStore<FlakyBackend<MemoryStore>>;

fn flaky_store(config: StoreConfig) -> (Arc<FlakyBackend<MemoryStore>>, FlakyStore) {
    let backend = Arc::new(FlakyBackend::new(MemoryStore::new()));
    let side = Arc::new(MemoryStore::new());
    let protector = Arc::new(MachineKeyProtector::from_secret(FIXTURE_SECRET, FIXTURE_SCOPE));
    let keys = Arc::new(KeyManager::with_config(side.clone(), protector, config.key_manager_config()));
    let audit = Arc::new(AuditLog::with_config(side, config.audit_log_config()));
    let store = SecureConfigStore::new(backend.clone(), keys, Arc::new(standard_acl()), audit, config);
    (backend, store)
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (backend, store) = flaky_store(StoreConfig::default());
    let admin = Principal::from("admin");
    store.set_value(&admin, DB_MAIN, "v1").await.unwrap();

    let before = backend.calls();
    backend.fail_next(2);
    let read = store.get_value(&admin, DB_MAIN).await.unwrap();
    assert_eq!(read.into_inner().as_deref(), Some("v1"));
    assert_eq!(backend.calls() - before, 3);
}

#[tokio::test]
async fn test_persistent_failure_surfaces_as_storage_error() {
    let (backend, store) = flaky_store(StoreConfig::default());
    let admin = Principal::from("admin");

    backend.fail_next(100);
    let err = store.get_value(&admin, DB_MAIN).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.kind(), "StorageError");
    assert_eq!(backend.calls(), store.config().retry.max_attempts as usize);

    let failures = store
        .audit()
        .query(&AuditFilter::all().path(DB_MAIN))
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].success);
    assert_eq!(failures[0].details.get("error_kind").map(String::as_str), Some("StorageError"));
}

#[tokio::test]
async fn test_single_attempt_config_does_not_retry() {
    let mut config = StoreConfig::default();
    config.retry.max_attempts = 1;
    let (backend, store) = flaky_store(config);

    backend.fail_next(1);
    assert!(store.get_value(&Principal::from("admin"), DB_MAIN).await.is_err());
    assert_eq!(backend.calls(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_operations_across_paths() {
    let fx = TestFixture::new();
    let mut handles = Vec::new();
    for i in 0..16 {
        let writer = fx.writer.clone();
        handles.push(fx.store.spawn(move |s| async move {
            let path = format!(r"config\till{}\drawer", i % 4);
            s.set_value(&writer, &path, &i.to_string()).await?;
            Ok::<_, ConfigStoreError>(path)
        }));
    }
    for handle in handles {
        handle.join().await.unwrap();
    }

    for i in 0..4 {
        let path = format!(r"config\till{i}\drawer");
        let value = fx.store.get_value(&fx.reader, &path).await.unwrap().into_inner().unwrap();
        let n: usize = value.parse().unwrap();
        assert_eq!(n % 4, i);
    }
    assert!(fx.store.audit().verify_chain().await.unwrap().is_intact());
}

// ─────────────────────────────────────────────────────────────────────────────
// Retention and configuration
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_config_file_drives_retention() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{ "retention": {{ "max_entries": 4 }}, "audit_deny_list": ["pin"] }}"#
    )
    .unwrap();
    let config = StoreConfig::from_json_file(file.path()).unwrap();

    let fx = TestFixture::with_config(config);
    for i in 0..6 {
        fx.store
            .set_value(&fx.admin, &format!(r"config\pin\v{i}"), "1234")
            .await
            .unwrap();
    }

    let report = fx.store.audit().prune().await.unwrap();
    assert_eq!(report.overflow, 2);
    assert_eq!(fx.store.audit().count().await.unwrap(), 4);

    // The custom deny list replaced the default one.
    let masker = fx.store.audit().masker();
    assert!(masker.is_sensitive("PIN"));
    assert!(!masker.is_sensitive("password"));
}

#[tokio::test]
async fn test_retention_task_runs_in_background() {
    let mut config = StoreConfig::default();
    config.retention.max_entries = Some(1);
    config.retention.interval_ms = 10;
    let fx = TestFixture::with_config(config);
    for i in 0..3 {
        fx.store
            .set_value(&fx.admin, &format!(r"config\bg\v{i}"), "x")
            .await
            .unwrap();
    }

    let task = fx.store.spawn_retention();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    task.abort();
    assert_eq!(fx.store.audit().count().await.unwrap(), 1);
}
