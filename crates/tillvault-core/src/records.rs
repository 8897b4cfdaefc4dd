//! Records persisted by the storage layer.
//!
//! These are plain data: the store crate writes and reads them, the keys
//! and audit crates give them meaning.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::now_millis;

/// One version of a symmetric key, as it sits in the key vault.
///
/// `wrapped` is the output of the platform key-protection facility. Raw key
/// bytes are never part of this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeyRecord {
    pub key_id: String,
    pub version: u32,
    #[serde(with = "hex::serde")]
    pub wrapped: Vec<u8>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub active: bool,
}

/// Operations recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditOperation {
    GetValue,
    SetValue,
    DeleteValue,
    DeleteContainer,
    ValueExists,
    ListChildren,
    ReEncrypt,
    Purge,
}

impl AuditOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::GetValue => "get_value",
            AuditOperation::SetValue => "set_value",
            AuditOperation::DeleteValue => "delete_value",
            AuditOperation::DeleteContainer => "delete_container",
            AuditOperation::ValueExists => "value_exists",
            AuditOperation::ListChildren => "list_children",
            AuditOperation::ReEncrypt => "re_encrypt",
            AuditOperation::Purge => "purge",
        }
    }

    /// Whether the operation changes stored state.
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            AuditOperation::SetValue
                | AuditOperation::DeleteValue
                | AuditOperation::DeleteContainer
                | AuditOperation::ReEncrypt
                | AuditOperation::Purge
        )
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOperation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_value" => Ok(AuditOperation::GetValue),
            "set_value" => Ok(AuditOperation::SetValue),
            "delete_value" => Ok(AuditOperation::DeleteValue),
            "delete_container" => Ok(AuditOperation::DeleteContainer),
            "value_exists" => Ok(AuditOperation::ValueExists),
            "list_children" => Ok(AuditOperation::ListChildren),
            "re_encrypt" => Ok(AuditOperation::ReEncrypt),
            "purge" => Ok(AuditOperation::Purge),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

/// A single audit record.
///
/// `seq` is assigned by the backend on append; `prev_hash`/`entry_hash` are
/// filled in by the audit log when the entry is chained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub id: String,
    pub path: String,
    pub operation: AuditOperation,
    pub principal: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub old_digest: Option<String>,
    pub new_digest: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub details: BTreeMap<String, String>,
    pub prev_hash: Option<String>,
    pub entry_hash: Option<String>,
}

impl AuditEntry {
    /// Start an entry for an operation on a path, stamped now.
    pub fn new(path: impl Into<String>, operation: AuditOperation, principal: impl Into<String>) -> Self {
        Self {
            seq: 0,
            id: String::new(),
            path: path.into(),
            operation,
            principal: principal.into(),
            timestamp: now_millis(),
            old_digest: None,
            new_digest: None,
            success: false,
            error: None,
            details: BTreeMap::new(),
            prev_hash: None,
            entry_hash: None,
        }
    }

    /// Mark the entry successful.
    pub fn succeeded(mut self) -> Self {
        self.success = true;
        self.error = None;
        self
    }

    /// Mark the entry failed with an error description.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Attach a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Selection criteria for querying or purging audit entries.
///
/// Every `None` field matches anything. `from`/`to` are inclusive Unix
/// milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub path: Option<String>,
    pub principal: Option<String>,
    pub operation: Option<AuditOperation>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl AuditFilter {
    /// A filter matching every entry.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn operation(mut self, operation: AuditOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn since(mut self, from: i64) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: i64) -> Self {
        self.to = Some(to);
        self
    }

    /// Whether an entry satisfies every criterion.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.path.as_ref().map_or(true, |p| *p == entry.path)
            && self.principal.as_ref().map_or(true, |p| *p == entry.principal)
            && self.operation.map_or(true, |op| op == entry.operation)
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
    }
}
