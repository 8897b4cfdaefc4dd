//! # Tillvault Core
//!
//! Pure primitives for Tillvault: configuration paths, rights, digests and
//! the record types persisted by the storage layer.
//!
//! This crate contains no I/O and no storage. Everything here is plain
//! computation over value types shared by the other crates.
//!
//! ## Key Types
//!
//! - [`ConfigPath`] - Structured locator into the hierarchical store
//! - [`PathResolver`] - Parses and validates raw `root\segment\...\value` paths
//! - [`Right`] / [`RightSet`] - Capabilities required by each operation
//! - [`Sha256Digest`] - Collision-resistant digest used for audit and hashing
//! - [`AuditEntry`] / [`WrappedKeyRecord`] - Records persisted by the store

pub mod crypto;
pub mod error;
pub mod path;
pub mod records;
pub mod rights;
pub mod types;

pub use crypto::{
    constant_time_eq, derive_key, hash, random_bytes, verify_hash, Sha256Digest,
    DERIVED_KEY_LEN, DIGEST_LEN, MIN_KDF_ITERATIONS,
};
pub use error::{CoreError, ParseError, ParseErrorReason};
pub use path::{ConfigPath, PathResolver, DEFAULT_ROOTS, MAX_DEPTH, PATH_SEPARATOR};
pub use records::{AuditEntry, AuditFilter, AuditOperation, WrappedKeyRecord};
pub use rights::{Right, RightSet};
pub use types::{now_millis, Principal};
