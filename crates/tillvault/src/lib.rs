//! # Tillvault
//!
//! Secure configuration storage for point-of-sale administration.
//!
//! ## Overview
//!
//! A local, hierarchical key-value store for terminal and back-office
//! settings. Sensitive values (database credentials, service secrets) are
//! sealed with AES-256-GCM, every call is checked against the caller's
//! rights, and every call leaves an entry in a tamper-evident audit log.
//!
//! ## Key Concepts
//!
//! - **Path**: `root\container\...\value`, e.g. `config\db\main`.
//! - **Principal**: the identity an operation runs for; opaque to the store.
//! - **Fail closed / fail open**: with the audit log down, writes and
//!   deletes are refused; reads are served with a warning.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tillvault::keys::MachineKeyProtector;
//! use tillvault::perms::AclTable;
//! use tillvault::store::SqliteStore;
//! use tillvault::{Principal, SecureConfigStore, StoreConfig};
//!
//! async fn example() -> tillvault::Result<()> {
//!     let backend = Arc::new(SqliteStore::open("tillvault.db").map_err(tillvault::ConfigStoreError::from)?);
//!     let protector = Arc::new(MachineKeyProtector::open(
//!         "machine.secret",
//!         MachineKeyProtector::current_scope(),
//!     )?);
//!     let acl = Arc::new(AclTable::new());
//!
//!     let store = SecureConfigStore::open(backend, protector, acl, StoreConfig::default())?;
//!     let admin = Principal::from("backoffice-admin");
//!     store.set_value(&admin, r"config\db\main", r#"{"server":"db1"}"#).await?;
//!     let value = store.get_value(&admin, r"config\db\main").await?;
//!     println!("{:?}", value.into_inner());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tillvault::core` - paths, rights, digests
//! - `tillvault::store` - backing store traits, SQLite and in-memory backends
//! - `tillvault::keys` - key manager and encryption engine
//! - `tillvault::perms` - access policy and permission gate
//! - `tillvault::audit` - audit log

pub mod config;
pub mod config_store;
pub mod error;
pub mod locks;
pub mod task;
pub mod value;

// Re-export component crates
pub use tillvault_audit as audit;
pub use tillvault_core as core;
pub use tillvault_keys as keys;
pub use tillvault_perms as perms;
pub use tillvault_store as store;

pub use config::{RetentionConfig, RetryConfig, StoreConfig, DEFAULT_KEY_ID, MAX_VALUE_SIZE};
pub use error::{ConfigStoreError, Result};
pub use locks::PathLocks;
pub use config_store::{BatchItem, Observed, SecureConfigStore};
pub use task::OperationHandle;
pub use value::{Protection, StoredValue};

pub use tillvault_core::{ConfigPath, PathResolver, Principal, Right, RightSet};
