//! Error types for the audit module.

use thiserror::Error;
use tillvault_store::StoreError;

/// Errors that can occur while recording or reading audit entries.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing log failed or timed out.
    #[error("audit backend error: {0}")]
    Backend(#[from] StoreError),

    /// An entry could not be encoded for chaining.
    #[error("audit integrity error: {0}")]
    Integrity(String),
}

/// Result type for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
