//! # Tillvault Keys
//!
//! Key lifecycle management and authenticated encryption.
//!
//! ## Overview
//!
//! - [`KeyManager`] generates 256-bit keys, persists them wrapped through a
//!   [`KeyProtector`], caches unwrapped keys per process, rotates and
//!   retires them, and exports/imports wrapped backups.
//! - [`EncryptionEngine`] seals and opens [`EncryptedEnvelope`]s with
//!   AES-256-GCM, hashes with SHA-256 and derives password keys with
//!   PBKDF2.
//!
//! ## Key Types
//!
//! - [`EncryptionKey`]: one key version. Raw material never leaves this crate.
//! - [`EncryptedEnvelope`]: self-describing ciphertext naming its key version.
//! - [`MachineKeyProtector`]: file-backed machine secret, scope-bound.
//!
//! ## Security Notes
//!
//! - Every envelope binds its key id and version as associated data.
//! - Retiring a key makes its envelopes permanently undecryptable.
//! - Key material is zeroized on drop.

pub mod engine;
pub mod envelope;
pub mod error;
pub mod key;
pub mod manager;
pub mod protector;

pub use engine::{open_detached, seal_detached, EncryptionEngine, PASSWORD_SALT_LEN};
pub use envelope::{EncryptedEnvelope, EnvelopeFormat, IV_LEN, TAG_LEN};
pub use error::{KeyError, Result};
pub use key::{EncryptionKey, KeyMaterial, KEY_SIZE};
pub use manager::{KeyBackup, KeyManager, KeyManagerConfig};
pub use protector::{KeyProtector, MachineKeyProtector};
