//! Known-answer vectors for the cryptographic primitives.
//!
//! Published outputs (FIPS 180-2, RFC 7914 section 11, McGrew and Viega's
//! GCM test cases 13 and 14) that the store's hashing, key derivation and
//! sealing must reproduce bit for bit.

use tillvault_core::{derive_key, hash};
use tillvault_keys::{seal_detached, IV_LEN, KEY_SIZE};

/// Which primitive a vector exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Sha256,
    /// PBKDF2-HMAC-SHA256 to a 32-byte key.
    Pbkdf2 { iterations: u32 },
    /// AES-256-GCM with an all-zero key and IV; output is ciphertext || tag.
    Aes256GcmZero,
}

/// A known-answer vector.
#[derive(Debug, Clone)]
pub struct KnownAnswer {
    pub name: &'static str,
    pub primitive: Primitive,
    pub input: &'static [u8],
    /// PBKDF2 salt; empty for other primitives.
    pub salt: &'static [u8],
    /// Expected output (hex).
    pub expected: &'static str,
}

/// All known-answer vectors.
pub fn all_vectors() -> Vec<KnownAnswer> {
    vec![
        KnownAnswer {
            name: "SHA-256 of abc",
            primitive: Primitive::Sha256,
            input: b"abc",
            salt: b"",
            expected: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        },
        KnownAnswer {
            name: "SHA-256 of empty input",
            primitive: Primitive::Sha256,
            input: b"",
            salt: b"",
            expected: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        },
        KnownAnswer {
            name: "PBKDF2-HMAC-SHA256 Password/NaCl",
            primitive: Primitive::Pbkdf2 { iterations: 80_000 },
            input: b"Password",
            salt: b"NaCl",
            expected: "4ddcd8f60b98be21830cee5ef22701f9641a4418d04c0414aeff08876b34ab56",
        },
        KnownAnswer {
            name: "AES-256-GCM empty plaintext",
            primitive: Primitive::Aes256GcmZero,
            input: b"",
            salt: b"",
            expected: "530f8afbc74536b9a963b4f1c4cb738b",
        },
        KnownAnswer {
            name: "AES-256-GCM one zero block",
            primitive: Primitive::Aes256GcmZero,
            input: &[0u8; 16],
            salt: b"",
            expected: "cea7403d4d606b6e074ec5d3baf39d18d0d1c8a799996bf0265b98b5d48ab919",
        },
    ]
}

/// Compute a vector's output with the store's primitives, as hex.
pub fn compute(vector: &KnownAnswer) -> Result<String, String> {
    match vector.primitive {
        Primitive::Sha256 => Ok(hash(vector.input).to_hex()),
        Primitive::Pbkdf2 { iterations } => derive_key(vector.input, vector.salt, iterations)
            .map(|key| hex::encode(key.as_slice()))
            .map_err(|e| e.to_string()),
        Primitive::Aes256GcmZero => {
            let (mut ciphertext, tag) =
                seal_detached(&[0u8; KEY_SIZE], &[0u8; IV_LEN], b"", vector.input)
                    .map_err(|e| e.to_string())?;
            ciphertext.extend_from_slice(&tag);
            Ok(hex::encode(ciphertext))
        }
    }
}

/// Run every vector. Returns a description of each mismatch.
pub fn verify_all_vectors() -> Vec<String> {
    all_vectors()
        .iter()
        .filter_map(|vector| match compute(vector) {
            Ok(actual) if actual == vector.expected => None,
            Ok(actual) => Some(format!(
                "{}: expected {}, got {actual}",
                vector.name, vector.expected
            )),
            Err(e) => Some(format!("{}: {e}", vector.name)),
        })
        .collect()
}
