//! Platform key protection.
//!
//! Raw key bytes are never written anywhere without first passing through a
//! [`KeyProtector`]. The protector is bound to a machine/user scope: bytes
//! wrapped under one scope do not unwrap under another.
//!
//! [`MachineKeyProtector`] is the implementation for hosts without an OS
//! data-protection API. It seals key bytes with AES-256-GCM under a 32-byte
//! machine secret kept in an owner-only file, with the scope label bound as
//! associated data.
//!
//! ## Wrapped format
//!
//! ```text
//! "TVK1" | nonce (12) | sealed key + tag | SHA-256 of everything before it
//! ```
//!
//! The trailing checksum does not depend on the secret or the scope, so a
//! damaged blob is told apart from one sealed for another scope: the first
//! is an integrity failure, the second a protection failure.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use tillvault_core::{hash, verify_hash, Sha256Digest, DIGEST_LEN};
use zeroize::Zeroizing;

use crate::error::{KeyError, Result};

/// Machine secret length.
pub const SECRET_LEN: usize = 32;

/// File mode for the machine secret.
pub const SECRET_FILE_MODE: u32 = 0o600;

const WRAP_MAGIC: &[u8; 4] = b"TVK1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Wraps and unwraps raw key bytes with a machine/user-bound secret.
///
/// Calls may block (file or OS facility access); the key manager invokes
/// them on the blocking pool.
pub trait KeyProtector: Send + Sync {
    /// Wrap raw bytes for storage.
    fn protect(&self, plain: &[u8]) -> Result<Vec<u8>>;

    /// Recover raw bytes from a wrapped blob.
    fn unprotect(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// The scope label wrapped bytes are bound to.
    fn scope(&self) -> &str;
}

/// File-backed machine secret protector.
pub struct MachineKeyProtector {
    secret: Zeroizing<[u8; SECRET_LEN]>,
    scope: String,
}

impl MachineKeyProtector {
    /// Load the machine secret at `path`, creating it if absent.
    pub fn open(path: impl AsRef<Path>, scope: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let secret = match fs::read(path) {
            Ok(bytes) => Self::parse_secret(path, &bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::create_secret(path)?,
            Err(e) => {
                return Err(KeyError::Storage(format!(
                    "read machine secret {}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            secret,
            scope: scope.into(),
        })
    }

    /// Build from an explicit secret.
    pub fn from_secret(secret: [u8; SECRET_LEN], scope: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            scope: scope.into(),
        }
    }

    /// The scope label of the current process: machine id plus user name.
    pub fn current_scope() -> String {
        let machine = fs::read_to_string("/etc/machine-id")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .unwrap_or_else(|| "unknown-machine".to_string());
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".to_string());
        format!("{machine}/{user}")
    }

    fn parse_secret(path: &Path, bytes: &[u8]) -> Result<Zeroizing<[u8; SECRET_LEN]>> {
        let arr: [u8; SECRET_LEN] = bytes.try_into().map_err(|_| KeyError::Integrity {
            key_id: "machine-secret".into(),
            reason: format!(
                "{} holds {} bytes, expected {SECRET_LEN}",
                path.display(),
                bytes.len()
            ),
        })?;
        Ok(Zeroizing::new(arr))
    }

    fn create_secret(path: &Path) -> Result<Zeroizing<[u8; SECRET_LEN]>> {
        let secret = Zeroizing::new(tillvault_core::random_bytes::<SECRET_LEN>());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| KeyError::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(SECRET_FILE_MODE);
        }

        match options.open(path) {
            Ok(mut file) => {
                file.write_all(secret.as_slice())
                    .and_then(|_| file.sync_all())
                    .map_err(|e| KeyError::Storage(format!("write {}: {e}", path.display())))?;
                tracing::info!(path = %path.display(), "created machine secret");
                Ok(secret)
            }
            // Another process created it first; use theirs.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let bytes = fs::read(path)
                    .map_err(|e| KeyError::Storage(format!("read {}: {e}", path.display())))?;
                Self::parse_secret(path, &bytes)
            }
            Err(e) => Err(KeyError::Storage(format!("create {}: {e}", path.display()))),
        }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.secret.as_slice())
            .map_err(|e| KeyError::Protection(format!("invalid machine secret: {e}")))
    }
}

impl KeyProtector for MachineKeyProtector {
    fn protect(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes: [u8; NONCE_LEN] = tillvault_core::random_bytes();
        let sealed = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plain,
                    aad: self.scope.as_bytes(),
                },
            )
            .map_err(|e| KeyError::Protection(format!("wrap failed: {e}")))?;

        let mut out =
            Vec::with_capacity(WRAP_MAGIC.len() + NONCE_LEN + sealed.len() + DIGEST_LEN);
        out.extend_from_slice(WRAP_MAGIC);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        let checksum = hash(&out);
        out.extend_from_slice(checksum.as_bytes());
        Ok(out)
    }

    fn unprotect(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let header = WRAP_MAGIC.len() + NONCE_LEN;
        let malformed = |reason: &str| KeyError::Integrity {
            key_id: String::new(),
            reason: reason.into(),
        };
        if wrapped.len() < header + TAG_LEN + DIGEST_LEN || !wrapped.starts_with(WRAP_MAGIC) {
            return Err(malformed("malformed wrapped key"));
        }

        let (body, checksum) = wrapped.split_at(wrapped.len() - DIGEST_LEN);
        let mut expected = [0u8; DIGEST_LEN];
        expected.copy_from_slice(checksum);
        if !verify_hash(body, &Sha256Digest(expected)) {
            return Err(malformed("wrapped key checksum mismatch"));
        }

        let nonce = Nonce::from_slice(&body[WRAP_MAGIC.len()..header]);
        let plain = self
            .cipher()?
            .decrypt(
                nonce,
                Payload {
                    msg: &body[header..],
                    aad: self.scope.as_bytes(),
                },
            )
            .map_err(|_| {
                KeyError::Protection(format!("unwrap failed under scope {:?}", self.scope))
            })?;
        Ok(Zeroizing::new(plain))
    }

    fn scope(&self) -> &str {
        &self.scope
    }
}
