//! # Tillvault Testkit
//!
//! Testing utilities for Tillvault.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Known-answer vectors**: published SHA-256, PBKDF2 and AES-GCM outputs
//!   the primitives must reproduce
//! - **Generators**: Proptest strategies for paths, principals and values
//! - **Fixtures**: a store wired to in-memory backends with a standard cast
//!   of principals
//! - **Fault injection**: backends that fail on demand, for fail-closed and
//!   retry behaviour
//!
//! ## Known-Answer Vectors
//!
//! ```rust
//! use tillvault_testkit::vectors::verify_all_vectors;
//!
//! let failures = verify_all_vectors();
//! assert!(failures.is_empty(), "{failures:?}");
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tillvault_testkit::generators::value_path;
//!
//! proptest! {
//!     #[test]
//!     fn paths_resolve(raw in value_path()) {
//!         prop_assert!(PathResolver::default().resolve(&raw).is_ok());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use tillvault_testkit::fixtures::TestFixture;
//!
//! let fx = TestFixture::new();
//! fx.store.set_value(&fx.writer, r"config\db\main", "{}").await?;
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use faults::{FlakyAudit, FlakyBackend};
pub use fixtures::TestFixture;
pub use generators::{container_path, principal_name, value_path, value_text};
pub use vectors::{all_vectors, verify_all_vectors, KnownAnswer};
