//! Error types for the keys module.

use thiserror::Error;
use tillvault_store::StoreError;

/// Errors that can occur during key management and encryption.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key vault or key-protection facility unavailable. Retryable.
    #[error("key storage unavailable: {0}")]
    Storage(String),

    /// A stored key record is corrupt. Fatal for that key only.
    #[error("key integrity error for {key_id}: {reason}")]
    Integrity { key_id: String, reason: String },

    /// Ciphertext failed authentication or its key is gone.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// No key with this id exists.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The protector refused to wrap or unwrap.
    #[error("key protection error: {0}")]
    Protection(String),

    /// Caller supplied parameters below the safety floor.
    #[error("weak parameters: {0}")]
    WeakParameters(String),

    /// Envelope or backup serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KeyError {
    /// Whether the failure is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeyError::Storage(_))
    }
}

impl From<StoreError> for KeyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Integrity(reason) => KeyError::Integrity {
                key_id: String::new(),
                reason,
            },
            other => KeyError::Storage(other.to_string()),
        }
    }
}

impl From<tillvault_core::CoreError> for KeyError {
    fn from(err: tillvault_core::CoreError) -> Self {
        KeyError::WeakParameters(err.to_string())
    }
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, KeyError>;
