//! # Tillvault Audit
//!
//! Append-only record of every configuration-store operation.
//!
//! ## Overview
//!
//! Entries are masked before they are persisted (no secret values, no
//! deny-listed words in free text) and linked into a keyed BLAKE3 hash
//! chain, so edits to or removals from the middle of the log are
//! detectable. Retention removes the oldest entries by age or count.
//!
//! ## Key Types
//!
//! - [`AuditLog`]: record, query, purge, prune, verify
//! - [`Masker`]: deny-list masking of free text and detail maps
//! - [`RetentionPolicy`]: age and count limits
//! - [`ChainReport`]: outcome of a chain verification

pub mod chain;
pub mod error;
pub mod log;
pub mod mask;
pub mod retention;

pub use chain::{verify_chain, ChainReport};
pub use error::{AuditError, Result};
pub use log::{AuditLog, AuditLogConfig};
pub use mask::{Masker, DEFAULT_DENY_LIST, MASK, REDACTED_WORD};
pub use retention::{RetentionPolicy, RetentionReport};
