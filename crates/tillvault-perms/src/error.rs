//! Error types for the permissions module.

use thiserror::Error;

/// Errors that can occur while reading or administering access policy.
#[derive(Debug, Error)]
pub enum PermsError {
    /// The policy source could not be consulted.
    #[error("access policy unavailable: {0}")]
    Policy(String),

    /// A policy document was malformed.
    #[error("invalid policy document: {0}")]
    InvalidPolicy(String),

    /// A path in a policy document did not resolve.
    #[error("invalid path in policy: {0}")]
    Path(#[from] tillvault_core::ParseError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
