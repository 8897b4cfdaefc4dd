//! # Tillvault Store
//!
//! Storage abstraction for Tillvault. Three persistence regions sit behind
//! async traits so the rest of the system stays storage-agnostic:
//!
//! - [`BackingStore`] - hierarchical key-value blobs addressed by `ConfigPath`
//! - [`KeyVault`] - wrapped key records, one row per key version
//! - [`AuditBackend`] - append-only audit entries
//!
//! [`SqliteStore`] is the persistent implementation of all three;
//! [`MemoryStore`] has the same semantics and is used in tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use tillvault_core::PathResolver;
//! use tillvault_store::{BackingStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("tillvault.db").unwrap();
//!     let path = PathResolver::default().resolve(r"config\db\main").unwrap();
//!
//!     store.raw_set(&path, Bytes::from_static(b"opaque")).await.unwrap();
//!     assert!(store.raw_get(&path).await.unwrap().is_some());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Opaque blobs**: the store never interprets values; envelopes are
//!   serialized above this layer.
//! - **Implicit containers**: writing a value creates every missing
//!   ancestor container. Roots always exist.
//! - **First writer wins**: inserting an existing key version returns the
//!   persisted record instead of overwriting it.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AuditBackend, BackingStore, Children, KeyVault};
