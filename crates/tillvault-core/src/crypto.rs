//! Hashing and password-based key derivation.
//!
//! SHA-256 for digests, PBKDF2-HMAC-SHA256 for password-derived keys.
//! Authenticated encryption lives in `tillvault-keys`, next to the key
//! material it needs.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of a derived key in bytes (AES-256).
pub const DERIVED_KEY_LEN: usize = 32;

/// Minimum PBKDF2 iteration count accepted from callers.
pub const MIN_KDF_ITERATIONS: u32 = 10_000;

/// A SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Digest(#[serde(with = "hex::serde")] pub [u8; DIGEST_LEN]);

impl Sha256Digest {
    /// Hash arbitrary data.
    pub fn hash(data: &[u8]) -> Self {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&Sha256::digest(data));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidDigest(e.to_string()))?;
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidDigest(format!("expected {DIGEST_LEN} bytes")))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({})", self.to_hex())
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash data with SHA-256.
pub fn hash(data: &[u8]) -> Sha256Digest {
    Sha256Digest::hash(data)
}

/// Check `data` against a digest without an early exit on mismatch.
pub fn verify_hash(data: &[u8], digest: &Sha256Digest) -> bool {
    constant_time_eq(hash(data).as_bytes(), digest.as_bytes())
}

/// Compare two byte strings, touching every byte regardless of where they
/// first differ. Lengths are not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Derive a 256-bit key from a password with PBKDF2-HMAC-SHA256.
///
/// Rejects iteration counts below [`MIN_KDF_ITERATIONS`] and empty salts.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>> {
    if iterations < MIN_KDF_ITERATIONS {
        return Err(CoreError::WeakKdfParameters(format!(
            "{iterations} iterations is below the floor of {MIN_KDF_ITERATIONS}"
        )));
    }
    if salt.is_empty() {
        return Err(CoreError::WeakKdfParameters("salt must not be empty".into()));
    }

    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, key.as_mut_slice());
    Ok(key)
}

/// Fill an array from the thread-local CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_answer() {
        assert_eq!(
            hash(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_hash() {
        let digest = hash(b"server=db1");
        assert!(verify_hash(b"server=db1", &digest));
        assert!(!verify_hash(b"server=db2", &digest));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_digest_hex_roundtrip() {
        let digest = hash(b"x");
        assert_eq!(Sha256Digest::from_hex(&digest.to_hex()).unwrap(), digest);
        assert!(Sha256Digest::from_hex("abcd").is_err());
        assert!(Sha256Digest::from_hex("zz").is_err());
    }

    #[test]
    fn test_derive_key_rejects_low_iterations() {
        let err = derive_key(b"pw", b"saltsalt", MIN_KDF_ITERATIONS - 1).unwrap_err();
        assert!(matches!(err, CoreError::WeakKdfParameters(_)));
        assert!(derive_key(b"pw", b"", MIN_KDF_ITERATIONS).is_err());
    }

    #[test]
    fn test_derive_key_deterministic() {
        let k1 = derive_key(b"pw", b"saltsalt", MIN_KDF_ITERATIONS).unwrap();
        let k2 = derive_key(b"pw", b"saltsalt", MIN_KDF_ITERATIONS).unwrap();
        let k3 = derive_key(b"pw", b"othersalt", MIN_KDF_ITERATIONS).unwrap();
        assert_eq!(*k1, *k2);
        assert_ne!(*k1, *k3);
    }

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 16] = random_bytes();
        let b: [u8; 16] = random_bytes();
        assert_ne!(a, b);
    }
}
