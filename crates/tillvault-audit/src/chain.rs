//! Hash chaining of audit entries.
//!
//! Each entry's hash covers its canonical CBOR encoding (without `seq` or
//! `entry_hash`) and the previous entry's hash, under a BLAKE3 key derived
//! from a fixed context string. Editing any persisted field, or removing an
//! entry from the middle of the log, breaks the chain.
//!
//! Verification anchors at the first retained entry: retention pruning
//! removes the oldest entries, so the first survivor's `prev_hash` points at
//! something no longer present.

use serde::Serialize;
use std::collections::BTreeMap;
use tillvault_core::{AuditEntry, AuditOperation};

use crate::error::{AuditError, Result};

const CHAIN_CONTEXT: &str = "tillvault 2024-06 audit entry chain v1";

#[derive(Serialize)]
struct ChainedView<'a> {
    id: &'a str,
    path: &'a str,
    operation: AuditOperation,
    principal: &'a str,
    timestamp: i64,
    old_digest: Option<&'a str>,
    new_digest: Option<&'a str>,
    success: bool,
    error: Option<&'a str>,
    details: &'a BTreeMap<String, String>,
    prev_hash: Option<&'a str>,
}

/// Compute the chain hash of `entry` as it currently stands (its own
/// `prev_hash` included).
pub fn entry_hash(entry: &AuditEntry) -> Result<String> {
    let view = ChainedView {
        id: &entry.id,
        path: &entry.path,
        operation: entry.operation,
        principal: &entry.principal,
        timestamp: entry.timestamp,
        old_digest: entry.old_digest.as_deref(),
        new_digest: entry.new_digest.as_deref(),
        success: entry.success,
        error: entry.error.as_deref(),
        details: &entry.details,
        prev_hash: entry.prev_hash.as_deref(),
    };

    let mut encoded = Vec::new();
    ciborium::into_writer(&view, &mut encoded)
        .map_err(|e| AuditError::Integrity(format!("encode entry {}: {e}", entry.id)))?;

    let mut hasher = blake3::Hasher::new_derive_key(CHAIN_CONTEXT);
    hasher.update(&encoded);
    Ok(hasher.finalize().to_hex().to_string())
}

/// Link `entry` after `prev_hash` and seal it.
pub fn seal(entry: &mut AuditEntry, prev_hash: Option<String>) -> Result<()> {
    entry.prev_hash = prev_hash;
    entry.entry_hash = Some(entry_hash(entry)?);
    Ok(())
}

/// Result of walking the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Entries examined.
    pub checked: usize,
    /// Sequence numbers whose content no longer matches their hash.
    pub tampered: Vec<u64>,
    /// Sequence numbers whose `prev_hash` does not match the entry before.
    pub unlinked: Vec<u64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.tampered.is_empty() && self.unlinked.is_empty()
    }
}

/// Verify a slice of entries. They are checked in `seq` order regardless
/// of input order.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainReport {
    let mut ordered: Vec<&AuditEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.seq);

    let mut report = ChainReport::default();
    let mut previous: Option<&AuditEntry> = None;

    for entry in ordered {
        report.checked += 1;

        let recomputed = entry_hash(entry).ok();
        if recomputed.is_none() || entry.entry_hash != recomputed {
            report.tampered.push(entry.seq);
        }

        if let Some(prev) = previous {
            if entry.prev_hash != prev.entry_hash {
                report.unlinked.push(entry.seq);
            }
        }
        previous = Some(entry);
    }

    if !report.is_intact() {
        tracing::warn!(
            checked = report.checked,
            tampered = report.tampered.len(),
            unlinked = report.unlinked.len(),
            "audit chain verification failed"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Vec<AuditEntry> {
        let mut out: Vec<AuditEntry> = Vec::new();
        for i in 0..n {
            let mut entry = AuditEntry::new(format!(r"config\v{i}"), AuditOperation::SetValue, "admin")
                .succeeded()
                .with_detail("attempt", i.to_string());
            entry.id = format!("id-{i}");
            entry.seq = i as u64 + 1;
            let prev = out.last().and_then(|e| e.entry_hash.clone());
            seal(&mut entry, prev).unwrap();
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_intact_chain() {
        let entries = chain(5);
        let report = verify_chain(&entries);
        assert_eq!(report.checked, 5);
        assert!(report.is_intact());
    }

    #[test]
    fn test_edit_is_detected() {
        let mut entries = chain(4);
        entries[2].principal = "mallory".into();
        let report = verify_chain(&entries);
        assert_eq!(report.tampered, vec![3]);
        assert!(report.unlinked.is_empty());
    }

    #[test]
    fn test_removal_is_detected() {
        let mut entries = chain(4);
        entries.remove(1);
        let report = verify_chain(&entries);
        assert!(report.tampered.is_empty());
        assert_eq!(report.unlinked, vec![3]);
    }

    #[test]
    fn test_pruned_head_still_verifies() {
        let entries = chain(6);
        let report = verify_chain(&entries[3..]);
        assert!(report.is_intact());
        assert_eq!(report.checked, 3);
    }

    #[test]
    fn test_unsealed_entry_is_tampered() {
        let mut entries = chain(2);
        entries[1].entry_hash = None;
        assert_eq!(verify_chain(&entries).tampered, vec![2]);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let entries = chain(1);
        assert_eq!(entry_hash(&entries[0]).unwrap(), entries[0].entry_hash.clone().unwrap());
    }
}
