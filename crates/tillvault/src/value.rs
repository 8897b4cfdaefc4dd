//! The stored form of a configuration value.
//!
//! The backing store holds opaque blobs. Each blob is a CBOR
//! [`StoredValue`]: either an encrypted envelope or plain text, tagged so a
//! read knows whether to decrypt.

use serde::{Deserialize, Serialize};
use tillvault_keys::EncryptedEnvelope;

use crate::error::{ConfigStoreError, Result};

/// How a value is protected at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protection {
    Encrypted,
    Plain,
}

impl Protection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protection::Encrypted => "encrypted",
            Protection::Plain => "plain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Encrypted(EncryptedEnvelope),
    Plain(String),
}

impl StoredValue {
    pub fn protection(&self) -> Protection {
        match self {
            StoredValue::Encrypted(_) => Protection::Encrypted,
            StoredValue::Plain(_) => Protection::Plain,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ConfigStoreError::Integrity(format!("encode stored value: {e}")))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| ConfigStoreError::Integrity(format!("decode stored value: {e}")))
    }
}

/// SHA-256 of a stored blob, hex. Recorded in audit entries in place of
/// the value itself.
pub fn blob_digest(blob: &[u8]) -> String {
    tillvault_core::hash(blob).to_hex()
}
