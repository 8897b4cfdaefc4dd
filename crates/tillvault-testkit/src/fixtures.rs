//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use tillvault::{SecureConfigStore, StoreConfig};
use tillvault_audit::AuditLog;
use tillvault_core::{ConfigPath, PathResolver, Principal, Right, RightSet};
use tillvault_keys::{KeyManager, MachineKeyProtector};
use tillvault_perms::{AclTable, SecurityDescriptor};
use tillvault_store::{AuditBackend, MemoryStore};

/// Machine secret shared by every fixture, so fixtures over the same
/// backend can read each other's values.
pub const FIXTURE_SECRET: [u8; 32] = [0x5a; 32];

/// Protection scope for fixture keys.
pub const FIXTURE_SCOPE: &str = "fixture-host/fixture-user";

/// A store over in-memory backends, with a standard cast of principals.
///
/// | principal  | rights under `config`        | elsewhere    |
/// |------------|------------------------------|--------------|
/// | `admin`    | FullControl                  | FullControl  |
/// | `writer`   | Write, CreateContainer       | none         |
/// | `reader`   | Read                         | none         |
/// | `nobody`   | none (registered)            | none         |
/// | `stranger` | unknown to the policy        |              |
pub struct TestFixture {
    pub backend: Arc<MemoryStore>,
    pub acl: Arc<AclTable>,
    pub store: Arc<SecureConfigStore<MemoryStore>>,
    pub admin: Principal,
    pub writer: Principal,
    pub reader: Principal,
    pub nobody: Principal,
    pub stranger: Principal,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let backend = Arc::new(MemoryStore::new());
        Self::assemble(backend.clone(), backend, config)
    }

    /// Route audit records to `audit` instead of the value backend.
    pub fn with_audit_backend(audit: Arc<dyn AuditBackend>) -> Self {
        Self::assemble(Arc::new(MemoryStore::new()), audit, StoreConfig::default())
    }

    fn assemble(backend: Arc<MemoryStore>, audit: Arc<dyn AuditBackend>, config: StoreConfig) -> Self {
        let acl = Arc::new(standard_acl());
        let protector = Arc::new(MachineKeyProtector::from_secret(FIXTURE_SECRET, FIXTURE_SCOPE));
        let keys = Arc::new(KeyManager::with_config(
            backend.clone(),
            protector,
            config.key_manager_config(),
        ));
        let audit = Arc::new(AuditLog::with_config(audit, config.audit_log_config()));
        let store = SecureConfigStore::new(backend.clone(), keys, acl.clone(), audit, config);

        Self {
            backend,
            acl,
            store: Arc::new(store),
            admin: Principal::from("admin"),
            writer: Principal::from("writer"),
            reader: Principal::from("reader"),
            nobody: Principal::from("nobody"),
            stranger: Principal::from("stranger"),
        }
    }

    /// Resolve a value path with the default resolver.
    pub fn value(&self, raw: &str) -> ConfigPath {
        resolve(raw, false)
    }

    /// Resolve a container path with the default resolver.
    pub fn container(&self, raw: &str) -> ConfigPath {
        resolve(raw, true)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// The policy behind [`TestFixture`].
pub fn standard_acl() -> AclTable {
    let acl = AclTable::new();
    let resolver = PathResolver::default();
    for name in ["admin", "writer", "reader", "nobody"] {
        register(&acl, name);
    }
    for root in resolver.roots() {
        let descriptor = SecurityDescriptor::new().with("admin", RightSet::full_control());
        let descriptor = if root == "config" {
            descriptor
                .with("writer", RightSet::of(&[Right::Write, Right::CreateContainer]))
                .with("reader", Right::Read)
        } else {
            descriptor
        };
        set_descriptor(&acl, resolve(root, true), descriptor);
    }
    acl
}

fn register(acl: &AclTable, name: &str) {
    if let Err(e) = acl.register_principal(name) {
        panic!("fixture policy rejected principal {name}: {e}");
    }
}

fn set_descriptor(acl: &AclTable, location: ConfigPath, descriptor: SecurityDescriptor) {
    if let Err(e) = acl.set_descriptor(location, descriptor) {
        panic!("fixture policy rejected descriptor: {e}");
    }
}

fn resolve(raw: &str, container: bool) -> ConfigPath {
    let resolver = PathResolver::default();
    let resolved = if container {
        resolver.resolve_container(raw)
    } else {
        resolver.resolve(raw)
    };
    match resolved {
        Ok(path) => path,
        Err(e) => panic!("fixture path {raw:?} does not resolve: {e}"),
    }
}
