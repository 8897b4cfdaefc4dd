//! Authenticated encryption and hashing.
//!
//! AES-256-GCM with a fresh random 12-byte IV per call and a detached
//! 16-byte tag. Neither length is configurable.

use std::sync::Arc;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use zeroize::Zeroizing;

use tillvault_core::{now_millis, Sha256Digest, DERIVED_KEY_LEN};

use crate::envelope::{managed_aad, password_aad, EncryptedEnvelope, EnvelopeFormat, IV_LEN, TAG_LEN};
use crate::error::{KeyError, Result};
use crate::key::KEY_SIZE;
use crate::manager::KeyManager;

/// Salt length for password envelopes.
pub const PASSWORD_SALT_LEN: usize = 16;

/// Seal `plaintext` under `key`, returning ciphertext and detached tag.
pub fn seal_detached(
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KeyError::Protection(format!("invalid key: {e}")))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(iv), aad, &mut buffer)
        .map_err(|e| KeyError::Protection(format!("encryption failed: {e}")))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Open a detached-tag ciphertext. Any mismatch is `Authentication`; no
/// plaintext is released on failure.
pub fn open_detached(
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_LEN],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KeyError::Protection(format!("invalid key: {e}")))?;
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            aad,
            buffer.as_mut_slice(),
            Tag::from_slice(tag),
        )
        .map_err(|_| KeyError::Authentication("ciphertext failed authentication".into()))?;
    Ok(buffer)
}

/// Encrypts and decrypts with keys owned by a [`KeyManager`].
#[derive(Clone)]
pub struct EncryptionEngine {
    keys: Arc<KeyManager>,
}

impl EncryptionEngine {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypt under the active version of `key_id`, creating the key if
    /// needed. Empty plaintext still yields a full envelope.
    pub async fn encrypt(&self, plaintext: &[u8], key_id: &str) -> Result<EncryptedEnvelope> {
        let key = self.keys.get_or_create(key_id).await?;
        let iv: [u8; IV_LEN] = tillvault_core::random_bytes();
        let aad = managed_aad(&key.id, key.version);
        let (ciphertext, tag) = seal_detached(key.material().as_bytes(), &iv, &aad, plaintext)?;

        Ok(EncryptedEnvelope {
            format: EnvelopeFormat::Aes256Gcm,
            key_id: key.id.clone(),
            key_version: key.version,
            iv,
            tag,
            ciphertext,
            salt: None,
            kdf_iterations: None,
            created_at: now_millis(),
        })
    }

    /// Decrypt with the exact key version the envelope names.
    ///
    /// A missing (retired) key version is an `Authentication` failure.
    pub async fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Zeroizing<Vec<u8>>> {
        if envelope.format != EnvelopeFormat::Aes256Gcm {
            return Err(KeyError::Authentication(
                "envelope is password-protected".into(),
            ));
        }
        let key = self
            .keys
            .get_version(&envelope.key_id, envelope.key_version)
            .await?
            .ok_or_else(|| {
                KeyError::Authentication(format!(
                    "key {} version {} is not available",
                    envelope.key_id, envelope.key_version
                ))
            })?;

        open_detached(
            key.material().as_bytes(),
            &envelope.iv,
            &envelope.associated_data(),
            &envelope.ciphertext,
            &envelope.tag,
        )
    }

    /// Encrypt under a key derived from a password.
    pub fn encrypt_with_password(
        &self,
        plaintext: &[u8],
        password: &[u8],
        iterations: u32,
    ) -> Result<EncryptedEnvelope> {
        let salt: [u8; PASSWORD_SALT_LEN] = tillvault_core::random_bytes();
        let key = self.derive_key(password, &salt, iterations)?;
        let iv: [u8; IV_LEN] = tillvault_core::random_bytes();
        let (ciphertext, tag) = seal_detached(&key, &iv, &password_aad(iterations), plaintext)?;

        Ok(EncryptedEnvelope {
            format: EnvelopeFormat::Pbkdf2Aes256Gcm,
            key_id: String::new(),
            key_version: 0,
            iv,
            tag,
            ciphertext,
            salt: Some(salt.to_vec()),
            kdf_iterations: Some(iterations),
            created_at: now_millis(),
        })
    }

    /// Decrypt a password envelope. A wrong password is `Authentication`.
    pub fn decrypt_with_password(
        &self,
        envelope: &EncryptedEnvelope,
        password: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let (Some(salt), Some(iterations)) = (&envelope.salt, envelope.kdf_iterations) else {
            return Err(KeyError::Authentication(
                "envelope carries no password parameters".into(),
            ));
        };
        let key = self.derive_key(password, salt, iterations)?;
        open_detached(
            &key,
            &envelope.iv,
            &envelope.associated_data(),
            &envelope.ciphertext,
            &envelope.tag,
        )
    }

    pub fn hash(&self, data: &[u8]) -> Sha256Digest {
        tillvault_core::hash(data)
    }

    /// Constant-structure digest comparison.
    pub fn verify_hash(&self, data: &[u8], digest: &Sha256Digest) -> bool {
        tillvault_core::verify_hash(data, digest)
    }

    /// PBKDF2-HMAC-SHA256. Iteration counts below 10,000 are rejected.
    pub fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>> {
        Ok(tillvault_core::derive_key(password, salt, iterations)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protector::MachineKeyProtector;
    use proptest::prelude::*;
    use tillvault_core::MIN_KDF_ITERATIONS;
    use tillvault_store::MemoryStore;

    fn engine() -> EncryptionEngine {
        let keys = KeyManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MachineKeyProtector::from_secret([5u8; 32], "test")),
        );
        EncryptionEngine::new(Arc::new(keys))
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let engine = engine();
        let env = engine.encrypt(br#"{"server":"db1"}"#, "config-master").await.unwrap();

        assert_eq!(env.key_version, 1);
        assert_ne!(env.ciphertext, br#"{"server":"db1"}"#.to_vec());
        assert_eq!(&engine.decrypt(&env).await.unwrap()[..], br#"{"server":"db1"}"#);
    }

    #[tokio::test]
    async fn test_empty_plaintext_full_envelope() {
        let engine = engine();
        let env = engine.encrypt(b"", "k").await.unwrap();
        assert!(env.ciphertext.is_empty());
        assert_ne!(env.tag, [0u8; TAG_LEN]);
        assert!(engine.decrypt(&env).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_iv_per_call() {
        let engine = engine();
        let a = engine.encrypt(b"same", "k").await.unwrap();
        let b = engine.encrypt(b"same", "k").await.unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_envelopes_readable() {
        let engine = engine();
        let old = engine.encrypt(b"before", "k").await.unwrap();
        engine.keys().rotate("k").await.unwrap();
        let new = engine.encrypt(b"after", "k").await.unwrap();

        assert_eq!(old.key_version, 1);
        assert_eq!(new.key_version, 2);
        assert_eq!(&engine.decrypt(&old).await.unwrap()[..], b"before");
        assert_eq!(&engine.decrypt(&new).await.unwrap()[..], b"after");
    }

    #[tokio::test]
    async fn test_retired_key_fails_authentication() {
        let engine = engine();
        let env = engine.encrypt(b"secret", "k").await.unwrap();
        engine.keys().retire("k").await.unwrap();

        assert!(matches!(
            engine.decrypt(&env).await,
            Err(KeyError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_relabelled_envelope_fails() {
        let engine = engine();
        let env = engine.encrypt(b"secret", "a").await.unwrap();
        engine.encrypt(b"other", "b").await.unwrap();

        let mut moved = env.clone();
        moved.key_id = "b".into();
        assert!(matches!(
            engine.decrypt(&moved).await,
            Err(KeyError::Authentication(_))
        ));
    }

    #[test]
    fn test_password_roundtrip() {
        let engine = engine();
        let env = engine
            .encrypt_with_password(b"export", b"hunter2", MIN_KDF_ITERATIONS)
            .unwrap();

        assert_eq!(&engine.decrypt_with_password(&env, b"hunter2").unwrap()[..], b"export");
        assert!(matches!(
            engine.decrypt_with_password(&env, b"wrong"),
            Err(KeyError::Authentication(_))
        ));
        assert!(matches!(
            engine.encrypt_with_password(b"x", b"pw", 1_000),
            Err(KeyError::WeakParameters(_))
        ));
    }

    #[test]
    fn test_hash_and_verify() {
        let engine = engine();
        let digest = engine.hash(b"value");
        assert!(engine.verify_hash(b"value", &digest));
        assert!(!engine.verify_hash(b"valuf", &digest));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_encrypt_decrypt_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let rt = runtime();
            let engine = engine();
            let out = rt.block_on(async {
                let env = engine.encrypt(&plaintext, "k").await.unwrap();
                engine.decrypt(&env).await.unwrap()
            });
            prop_assert_eq!(&out[..], &plaintext[..]);
        }

        #[test]
        fn prop_single_bit_flip_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..128),
            bit in any::<usize>(),
        ) {
            let rt = runtime();
            let engine = engine();
            rt.block_on(async {
                let env = engine.encrypt(&plaintext, "k").await.unwrap();
                let total_bits = (env.ciphertext.len() + TAG_LEN) * 8;
                let bit = bit % total_bits;

                let mut tampered = env.clone();
                if bit < env.ciphertext.len() * 8 {
                    tampered.ciphertext[bit / 8] ^= 1 << (bit % 8);
                } else {
                    let tag_bit = bit - env.ciphertext.len() * 8;
                    tampered.tag[tag_bit / 8] ^= 1 << (tag_bit % 8);
                }

                assert!(matches!(
                    engine.decrypt(&tampered).await,
                    Err(KeyError::Authentication(_))
                ));
            });
        }
    }
}
