//! Symmetric key material and the key record handed out by the manager.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Raw 256-bit key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_SIZE]);

impl KeyMaterial {
    /// Fresh material from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Self(tillvault_core::random_bytes())
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy out of an unwrapped buffer. `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// One version of a symmetric encryption key.
///
/// Raw material stays inside this crate: [`EncryptionKey::material`] is
/// crate-private and only the engine borrows it, for one operation.
#[derive(Debug, Clone)]
pub struct EncryptionKey {
    pub id: String,
    pub version: u32,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub active: bool,
    material: KeyMaterial,
}

impl EncryptionKey {
    pub(crate) fn new(
        id: impl Into<String>,
        version: u32,
        material: KeyMaterial,
        created_at: i64,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            created_at,
            expires_at,
            active: true,
            material,
        }
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Whether the key is past its expiry at `now` (Unix ms).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.map_or(false, |exp| now >= exp)
    }

    /// Whether new encryptions may use this key at `now`.
    pub fn usable_for_encryption_at(&self, now: i64) -> bool {
        self.active && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_material() {
        let key = EncryptionKey::new("k", 1, KeyMaterial::from_bytes([7u8; KEY_SIZE]), 0, None);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("7, 7"));
    }

    #[test]
    fn test_expiry() {
        let key = EncryptionKey::new("k", 1, KeyMaterial::generate(), 0, Some(100));
        assert!(!key.is_expired_at(99));
        assert!(key.is_expired_at(100));
        assert!(key.usable_for_encryption_at(50));
        assert!(!key.usable_for_encryption_at(150));
    }

    #[test]
    fn test_from_slice_checks_length() {
        assert!(KeyMaterial::from_slice(&[0u8; 31]).is_none());
        assert!(KeyMaterial::from_slice(&[0u8; KEY_SIZE]).is_some());
    }
}
