//! Encrypted envelope.
//!
//! The unit produced by the engine: ciphertext plus everything needed to
//! decrypt it later. Envelopes name the exact key version they were sealed
//! under, so a value encrypted under version N still opens after rotation
//! to N+1 as long as version N is retained.

use serde::{Deserialize, Serialize};

use crate::error::{KeyError, Result};

/// AES-GCM IV length. Fixed.
pub const IV_LEN: usize = 12;

/// AES-GCM tag length. Fixed.
pub const TAG_LEN: usize = 16;

/// How the envelope's content key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvelopeFormat {
    /// AES-256-GCM under a managed key version.
    Aes256Gcm = 1,
    /// AES-256-GCM under a PBKDF2-HMAC-SHA256 password-derived key.
    Pbkdf2Aes256Gcm = 2,
}

/// Ciphertext plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub format: EnvelopeFormat,

    /// Managed key id. Empty for password envelopes.
    pub key_id: String,

    /// Managed key version. Zero for password envelopes.
    pub key_version: u32,

    pub iv: [u8; IV_LEN],

    pub tag: [u8; TAG_LEN],

    /// Ciphertext without the tag.
    pub ciphertext: Vec<u8>,

    /// KDF salt, password envelopes only.
    pub salt: Option<Vec<u8>>,

    /// KDF iteration count, password envelopes only.
    pub kdf_iterations: Option<u32>,

    /// Unix ms.
    pub created_at: i64,
}

impl EncryptedEnvelope {
    /// Associated data bound into the tag.
    ///
    /// Moving ciphertext between key ids or versions breaks authentication.
    pub fn associated_data(&self) -> Vec<u8> {
        match self.format {
            EnvelopeFormat::Aes256Gcm => managed_aad(&self.key_id, self.key_version),
            EnvelopeFormat::Pbkdf2Aes256Gcm => password_aad(self.kdf_iterations.unwrap_or_default()),
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| KeyError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| KeyError::Serialization(e.to_string()))
    }
}

pub(crate) fn managed_aad(key_id: &str, version: u32) -> Vec<u8> {
    format!("tillvault-envelope-v1:{key_id}:{version}").into_bytes()
}

pub(crate) fn password_aad(iterations: u32) -> Vec<u8> {
    format!("tillvault-envelope-v1:pbkdf2:{iterations}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptedEnvelope {
        EncryptedEnvelope {
            format: EnvelopeFormat::Aes256Gcm,
            key_id: "config-master".into(),
            key_version: 3,
            iv: [1; IV_LEN],
            tag: [2; TAG_LEN],
            ciphertext: vec![3, 4, 5],
            salt: None,
            kdf_iterations: None,
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_cbor_roundtrip() {
        let env = sample();
        let bytes = env.to_bytes().unwrap();
        assert_eq!(EncryptedEnvelope::from_bytes(&bytes).unwrap(), env);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            EncryptedEnvelope::from_bytes(b"\xff\x00not cbor"),
            Err(KeyError::Serialization(_))
        ));
    }

    #[test]
    fn test_aad_binds_key_and_version() {
        let env = sample();
        let mut other = sample();
        other.key_version = 4;
        assert_ne!(env.associated_data(), other.associated_data());
        assert_eq!(env.associated_data(), b"tillvault-envelope-v1:config-master:3");
    }
}
