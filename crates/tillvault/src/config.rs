//! Store configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tillvault_audit::{AuditLogConfig, RetentionPolicy, DEFAULT_DENY_LIST};
use tillvault_core::{PathResolver, DEFAULT_ROOTS, MAX_DEPTH};
use tillvault_keys::KeyManagerConfig;

use crate::error::{ConfigStoreError, Result};

/// Largest value accepted by `set_value`, in bytes.
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Default key id for encrypted values.
pub const DEFAULT_KEY_ID: &str = "config-master";

/// Configuration for [`crate::SecureConfigStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Accepted root identifiers.
    pub roots: Vec<String>,
    /// Maximum path depth (root + segments + value name).
    pub max_depth: usize,
    /// Key id used when a value is encrypted.
    pub default_key_id: String,
    /// Whether `set_value` encrypts unless told otherwise.
    pub encrypt_by_default: bool,
    /// Upper bound on a single storage call.
    pub storage_timeout_ms: u64,
    /// Largest accepted value, in bytes.
    pub max_value_size: usize,
    /// Lifetime of generated key versions. `None` means no expiry.
    pub key_ttl_ms: Option<u64>,
    pub retry: RetryConfig,
    pub retention: RetentionConfig,
    /// Words masked out of audit text.
    pub audit_deny_list: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            roots: DEFAULT_ROOTS.iter().map(|r| r.to_string()).collect(),
            max_depth: MAX_DEPTH,
            default_key_id: DEFAULT_KEY_ID.to_string(),
            encrypt_by_default: true,
            storage_timeout_ms: 5_000,
            max_value_size: MAX_VALUE_SIZE,
            key_ttl_ms: None,
            retry: RetryConfig::default(),
            retention: RetentionConfig::default(),
            audit_deny_list: DEFAULT_DENY_LIST.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// Bounded retry for transient storage failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each retry.
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 25,
        }
    }
}

impl RetryConfig {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Audit retention settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_ms: Option<u64>,
    pub max_entries: Option<usize>,
    /// How often the background pass runs.
    pub interval_ms: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_ms: None,
            max_entries: None,
            interval_ms: 60 * 60 * 1000,
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: self.max_age_ms.map(Duration::from_millis),
            max_entries: self.max_entries,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl StoreConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigStoreError::Storage(format!("read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(text)
            .map_err(|e| ConfigStoreError::InvalidInput(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigStoreError::InvalidInput(format!("config: {msg}")));
        if self.roots.iter().all(|r| r.trim().is_empty()) {
            return invalid("at least one root is required");
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be positive");
        }
        if self.default_key_id.trim().is_empty() {
            return invalid("default_key_id must not be empty");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.storage_timeout_ms == 0 {
            return invalid("storage_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(&self.roots, self.max_depth)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn key_manager_config(&self) -> KeyManagerConfig {
        KeyManagerConfig {
            key_ttl: self.key_ttl_ms.map(Duration::from_millis),
            storage_timeout: self.storage_timeout(),
        }
    }

    pub fn audit_log_config(&self) -> AuditLogConfig {
        AuditLogConfig {
            retention: self.retention.policy(),
            backend_timeout_ms: self.storage_timeout_ms,
            deny_list: self.audit_deny_list.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_depth, 32);
        assert_eq!(config.default_key_id, "config-master");
        assert!(config.encrypt_by_default);
        assert!(config.roots.iter().any(|r| r == "config"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = StoreConfig::from_json_str(
            r#"{ "default_key_id": "pos-keys", "retry": { "max_attempts": 5 },
                 "retention": { "max_entries": 1000 } }"#,
        )
        .unwrap();
        assert_eq!(config.default_key_id, "pos-keys");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_backoff_ms, 25);
        assert_eq!(config.retention.policy().max_entries, Some(1000));
        assert_eq!(config.storage_timeout_ms, 5_000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = StoreConfig::from_json_str(r#"{ "retry": { "max_attempts": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigStoreError::InvalidInput(_)));
        let err = StoreConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigStoreError::InvalidInput(_)));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "roots": ["config", "terminal"], "max_depth": 8 }}"#).unwrap();
        let config = StoreConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.roots, vec!["config", "terminal"]);
        assert!(config.resolver().resolve(r"terminal\till1\name").is_ok());
        assert!(config.resolver().resolve(r"system\x").is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(25));
        assert_eq!(retry.backoff(2), Duration::from_millis(50));
        assert_eq!(retry.backoff(3), Duration::from_millis(100));
    }
}
