//! Error types for the configuration store.
//!
//! Every lower-level failure is folded into one of a small set of kinds so
//! callers can decide what to do without knowing which component failed.

use thiserror::Error;
use tillvault_audit::AuditError;
use tillvault_core::{ParseError, Right};
use tillvault_keys::KeyError;
use tillvault_store::StoreError;

/// Errors surfaced by [`crate::SecureConfigStore`].
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Malformed path. Caller-fixable, never retried.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The principal lacks rights. Never retried.
    #[error("permission denied: {reason}")]
    PermissionDenied { missing: Vec<Right>, reason: String },

    /// A stored value failed authentication or its key is gone.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Backing store, key protection or audit backend unavailable.
    /// Transient; eligible for bounded retry.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored record is corrupt. Fatal for the affected item only.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The operation was aborted before it completed.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The request itself is unacceptable (oversized value, non-empty
    /// container, root removal).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ConfigStoreError {
    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfigStoreError::Storage(_))
    }

    /// Short kind name, as recorded in audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigStoreError::Parse(_) => "ParseError",
            ConfigStoreError::PermissionDenied { .. } => "PermissionDenied",
            ConfigStoreError::Authentication(_) => "AuthenticationError",
            ConfigStoreError::Storage(_) => "StorageError",
            ConfigStoreError::Integrity(_) => "IntegrityError",
            ConfigStoreError::Cancelled(_) => "Cancelled",
            ConfigStoreError::InvalidInput(_) => "InvalidInput",
        }
    }
}

impl From<StoreError> for ConfigStoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Integrity(_) | StoreError::Serialization(_) => {
                ConfigStoreError::Integrity(err.to_string())
            }
            StoreError::ContainerNotEmpty(_) => ConfigStoreError::InvalidInput(err.to_string()),
            other => ConfigStoreError::Storage(other.to_string()),
        }
    }
}

impl From<KeyError> for ConfigStoreError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Storage(_) | KeyError::Protection(_) => ConfigStoreError::Storage(err.to_string()),
            KeyError::Integrity { .. } | KeyError::Serialization(_) => {
                ConfigStoreError::Integrity(err.to_string())
            }
            KeyError::Authentication(_) | KeyError::NotFound(_) => {
                ConfigStoreError::Authentication(err.to_string())
            }
            KeyError::WeakParameters(_) => ConfigStoreError::InvalidInput(err.to_string()),
        }
    }
}

impl From<AuditError> for ConfigStoreError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Backend(e) => ConfigStoreError::Storage(format!("audit backend: {e}")),
            AuditError::Integrity(reason) => ConfigStoreError::Integrity(reason),
        }
    }
}

/// Result type for configuration store operations.
pub type Result<T> = std::result::Result<T, ConfigStoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tillvault_core::ParseErrorReason;

    #[test]
    fn test_only_storage_is_retryable() {
        assert!(ConfigStoreError::Storage("busy".into()).is_retryable());
        assert!(!ConfigStoreError::Authentication("tag".into()).is_retryable());
        assert!(!ConfigStoreError::PermissionDenied {
            missing: vec![Right::Read],
            reason: "no".into()
        }
        .is_retryable());
        assert!(!ConfigStoreError::from(ParseError::new("", ParseErrorReason::EmptyPath)).is_retryable());
    }

    #[test]
    fn test_lower_errors_map_to_kinds() {
        let e: ConfigStoreError = StoreError::Timeout(10).into();
        assert_eq!(e.kind(), "StorageError");
        let e: ConfigStoreError = StoreError::ContainerNotEmpty("config\\a".into()).into();
        assert_eq!(e.kind(), "InvalidInput");
        let e: ConfigStoreError = KeyError::Authentication("tag mismatch".into()).into();
        assert_eq!(e.kind(), "AuthenticationError");
        let e: ConfigStoreError = KeyError::Integrity {
            key_id: "k".into(),
            reason: "short".into(),
        }
        .into();
        assert_eq!(e.kind(), "IntegrityError");
        let e: ConfigStoreError = AuditError::Backend(StoreError::Unavailable("down".into())).into();
        assert!(e.is_retryable());
    }
}
