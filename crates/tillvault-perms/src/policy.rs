//! Access policy: who holds which rights where.
//!
//! [`AccessPolicy`] abstracts the platform's native access-control facility.
//! [`AclTable`] is the in-process implementation: a table of security
//! descriptors keyed by container path, plus the set of principals the
//! identity source recognises.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tillvault_core::{ConfigPath, PathResolver, Principal, Right, RightSet};

use crate::error::{PermsError, Result};

/// Rights granted on one location, per principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityDescriptor {
    entries: BTreeMap<Principal, RightSet>,
}

impl SecurityDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rights for a principal (merged with any already present).
    pub fn with(mut self, principal: impl Into<Principal>, rights: impl Into<RightSet>) -> Self {
        self.grant(principal.into(), rights.into());
        self
    }

    pub fn grant(&mut self, principal: Principal, rights: RightSet) {
        let entry = self.entries.entry(principal).or_default();
        *entry = entry.union(rights);
    }

    /// Remove specific rights. Drops the entry once it is empty.
    pub fn revoke(&mut self, principal: &Principal, rights: RightSet) {
        if let Some(entry) = self.entries.get_mut(principal) {
            *entry = entry.iter().filter(|r| !rights.contains(*r)).collect();
            if entry.is_empty() {
                self.entries.remove(principal);
            }
        }
    }

    /// Rights held by a principal. Empty if not listed.
    pub fn rights_of(&self, principal: &Principal) -> RightSet {
        self.entries.get(principal).copied().unwrap_or_default()
    }

    pub fn principals(&self) -> impl Iterator<Item = &Principal> {
        self.entries.keys()
    }
}

/// Source of identity and rights information.
///
/// Implementations must be side-effect free from the gate's perspective.
pub trait AccessPolicy: Send + Sync {
    /// Whether the identity source recognises this principal.
    fn is_known_principal(&self, principal: &Principal) -> Result<bool>;

    /// The descriptor attached directly to a container, if any.
    fn descriptor(&self, location: &ConfigPath) -> Result<Option<SecurityDescriptor>>;
}

#[derive(Debug, Default)]
struct AclInner {
    principals: BTreeSet<Principal>,
    descriptors: BTreeMap<ConfigPath, SecurityDescriptor>,
}

/// JSON shape accepted by [`AclTable::from_json`].
#[derive(Debug, Deserialize)]
struct AclDocument {
    #[serde(default)]
    principals: Vec<Principal>,
    #[serde(default)]
    descriptors: BTreeMap<String, BTreeMap<Principal, Vec<Right>>>,
}

/// In-process access-control table.
///
/// Descriptors inherit downward: a location without its own descriptor is
/// governed by the nearest ancestor that has one.
#[derive(Debug, Default)]
pub struct AclTable {
    inner: RwLock<AclInner>,
}

impl AclTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON document:
    ///
    /// ```json
    /// {
    ///   "principals": ["admin", "clerk"],
    ///   "descriptors": {
    ///     "config": { "admin": ["FullControl"] },
    ///     "config\\db": { "clerk": ["Read"] }
    ///   }
    /// }
    /// ```
    ///
    /// Descriptor keys are container paths, resolved with `resolver`.
    pub fn from_json(json: &str, resolver: &PathResolver) -> Result<Self> {
        let doc: AclDocument =
            serde_json::from_str(json).map_err(|e| PermsError::InvalidPolicy(e.to_string()))?;

        let table = AclTable::new();
        for principal in doc.principals {
            table.register_principal(principal)?;
        }
        for (raw, entries) in doc.descriptors {
            let location = resolver.resolve_container(&raw)?;
            let descriptor = entries
                .into_iter()
                .fold(SecurityDescriptor::new(), |d, (p, rights)| {
                    d.with(p, RightSet::from(rights))
                });
            table.set_descriptor(location, descriptor)?;
        }
        Ok(table)
    }

    /// Make a principal known to the identity source.
    pub fn register_principal(&self, principal: impl Into<Principal>) -> Result<()> {
        self.write()?.principals.insert(principal.into());
        Ok(())
    }

    pub fn unregister_principal(&self, principal: &Principal) -> Result<()> {
        self.write()?.principals.remove(principal);
        Ok(())
    }

    /// Grant rights on a location. The location's descriptor is created if
    /// absent; it then stops inheriting from ancestors.
    pub fn grant(
        &self,
        principal: impl Into<Principal>,
        location: &ConfigPath,
        rights: impl Into<RightSet>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .descriptors
            .entry(location.container())
            .or_default()
            .grant(principal.into(), rights.into());
        Ok(())
    }

    /// Revoke rights on a location's own descriptor.
    pub fn revoke(
        &self,
        principal: &Principal,
        location: &ConfigPath,
        rights: impl Into<RightSet>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(descriptor) = inner.descriptors.get_mut(&location.container()) {
            descriptor.revoke(principal, rights.into());
        }
        Ok(())
    }

    /// Replace a location's descriptor.
    pub fn set_descriptor(&self, location: ConfigPath, descriptor: SecurityDescriptor) -> Result<()> {
        self.write()?.descriptors.insert(location.container(), descriptor);
        Ok(())
    }

    /// Remove a location's own descriptor so it inherits again.
    pub fn clear_descriptor(&self, location: &ConfigPath) -> Result<()> {
        self.write()?.descriptors.remove(&location.container());
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, AclInner>> {
        self.inner
            .read()
            .map_err(|e| PermsError::Policy(format!("acl table poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, AclInner>> {
        self.inner
            .write()
            .map_err(|e| PermsError::Policy(format!("acl table poisoned: {e}")))
    }
}

impl AccessPolicy for AclTable {
    fn is_known_principal(&self, principal: &Principal) -> Result<bool> {
        Ok(self.read()?.principals.contains(principal))
    }

    fn descriptor(&self, location: &ConfigPath) -> Result<Option<SecurityDescriptor>> {
        Ok(self.read()?.descriptors.get(location).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(raw: &str) -> ConfigPath {
        PathResolver::default().resolve_container(raw).unwrap()
    }

    #[test]
    fn test_descriptor_grant_and_revoke() {
        let alice = Principal::from("alice");
        let mut d = SecurityDescriptor::new().with("alice", RightSet::of(&[Right::Read, Right::Write]));
        assert!(d.rights_of(&alice).contains(Right::Write));

        d.revoke(&alice, RightSet::from(Right::Write));
        assert_eq!(d.rights_of(&alice), RightSet::from(Right::Read));

        d.revoke(&alice, RightSet::from(Right::Read));
        assert_eq!(d.principals().count(), 0);
        assert!(d.rights_of(&Principal::from("nobody")).is_empty());
    }

    #[test]
    fn test_table_grants_are_per_container() {
        let table = AclTable::new();
        let value = PathResolver::default().resolve(r"config\db\main").unwrap();
        table.grant("alice", &value, Right::Read).unwrap();

        let db = table.descriptor(&container(r"config\db")).unwrap().unwrap();
        assert!(db.rights_of(&Principal::from("alice")).contains(Right::Read));
        assert!(table.descriptor(&container("config")).unwrap().is_none());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "principals": ["admin", "clerk"],
            "descriptors": {
                "CONFIG": { "admin": ["FullControl"] },
                "config/db": { "clerk": ["Read", "Write"] }
            }
        }"#;
        let table = AclTable::from_json(json, &PathResolver::default()).unwrap();

        assert!(table.is_known_principal(&Principal::from("clerk")).unwrap());
        assert!(!table.is_known_principal(&Principal::from("ghost")).unwrap());
        let db = table.descriptor(&container(r"config\db")).unwrap().unwrap();
        assert_eq!(
            db.rights_of(&Principal::from("clerk")),
            RightSet::of(&[Right::Read, Right::Write])
        );
        let root = table.descriptor(&container("config")).unwrap().unwrap();
        assert!(root.rights_of(&Principal::from("admin")).satisfies(Right::Delete));
    }

    #[test]
    fn test_from_json_rejects_bad_paths() {
        let json = r#"{ "descriptors": { "hklm\\x": { "a": ["Read"] } } }"#;
        assert!(matches!(
            AclTable::from_json(json, &PathResolver::default()),
            Err(PermsError::Path(_))
        ));
        assert!(matches!(
            AclTable::from_json("not json", &PathResolver::default()),
            Err(PermsError::InvalidPolicy(_))
        ));
    }
}
