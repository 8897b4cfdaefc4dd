//! The permission gate.
//!
//! Pure evaluation: given a principal, a path and the rights an operation
//! needs, decide. The gate never records anything; the orchestrator reports
//! denials to the audit log.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tillvault_core::{now_millis, ConfigPath, Principal, Right, RightSet};

use crate::policy::AccessPolicy;

/// Why a check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialCode {
    /// The identity source does not know the principal.
    UnknownPrincipal,
    /// One or more required rights are absent.
    MissingRights,
    /// The policy source failed; the gate fails closed.
    PolicyUnavailable,
}

impl DenialCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DenialCode::UnknownPrincipal => "UnknownPrincipal",
            DenialCode::MissingRights => "MissingRights",
            DenialCode::PolicyUnavailable => "PolicyUnavailable",
        }
    }
}

impl fmt::Display for DenialCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check. Transient; persisted only as an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheckResult {
    pub granted: bool,
    /// Required rights not held. Empty when granted.
    pub missing: Vec<Right>,
    /// Human-readable explanation.
    pub reason: String,
    pub code: Option<DenialCode>,
    pub principal: Principal,
    pub path: String,
    /// Unix ms.
    pub timestamp: i64,
}

/// Evaluates rights against an [`AccessPolicy`].
///
/// ## Evaluation rules
///
/// - Rights are held on containers. A value path is evaluated at its
///   container.
/// - Effective rights come from the nearest ancestor-or-self location that
///   carries a descriptor. No descriptor anywhere means no rights.
/// - `CreateContainer` is evaluated at the parent of the target container,
///   since the target does not exist yet.
/// - `FullControl` satisfies every right.
/// - Unknown principals and policy failures are denied (fail closed).
#[derive(Clone)]
pub struct PermissionGate {
    policy: Arc<dyn AccessPolicy>,
}

impl PermissionGate {
    pub fn new(policy: Arc<dyn AccessPolicy>) -> Self {
        Self { policy }
    }

    /// Check whether `principal` holds every right in `required` on `path`.
    pub fn check(
        &self,
        principal: &Principal,
        path: &ConfigPath,
        required: impl Into<RightSet>,
    ) -> PermissionCheckResult {
        let required = required.into();
        let result = self.evaluate(principal, path, required);
        if !result.granted {
            tracing::debug!(
                principal = %principal,
                path = %path,
                code = ?result.code,
                missing = ?result.missing,
                "permission denied"
            );
        }
        result
    }

    fn evaluate(
        &self,
        principal: &Principal,
        path: &ConfigPath,
        required: RightSet,
    ) -> PermissionCheckResult {
        let deny = |code: DenialCode, missing: Vec<Right>, reason: String| PermissionCheckResult {
            granted: false,
            missing,
            reason,
            code: Some(code),
            principal: principal.clone(),
            path: path.to_string(),
            timestamp: now_millis(),
        };

        if principal.is_empty() {
            return deny(
                DenialCode::UnknownPrincipal,
                required.iter().collect(),
                "no principal supplied".into(),
            );
        }
        match self.policy.is_known_principal(principal) {
            Ok(true) => {}
            Ok(false) => {
                return deny(
                    DenialCode::UnknownPrincipal,
                    required.iter().collect(),
                    format!("principal {principal} is not known to the identity source"),
                )
            }
            Err(e) => {
                return deny(
                    DenialCode::PolicyUnavailable,
                    required.iter().collect(),
                    e.to_string(),
                )
            }
        }

        let location = path.container();
        let mut missing = Vec::new();
        for right in required.iter() {
            let at = if right == Right::CreateContainer {
                location.parent().unwrap_or_else(|| location.clone())
            } else {
                location.clone()
            };
            match self.effective_rights(principal, &at) {
                Ok(held) if held.satisfies(right) => {}
                Ok(_) => missing.push(right),
                Err(e) => {
                    return deny(
                        DenialCode::PolicyUnavailable,
                        required.iter().collect(),
                        e.to_string(),
                    )
                }
            }
        }

        if missing.is_empty() {
            return PermissionCheckResult {
                granted: true,
                missing,
                reason: "granted".into(),
                code: None,
                principal: principal.clone(),
                path: path.to_string(),
                timestamp: now_millis(),
            };
        }

        let names: Vec<&str> = missing.iter().map(|r| r.as_str()).collect();
        let reason = format!("{principal} lacks {} on {location}", names.join(", "));
        deny(DenialCode::MissingRights, missing, reason)
    }

    /// Rights from the nearest ancestor-or-self descriptor.
    pub fn effective_rights(
        &self,
        principal: &Principal,
        location: &ConfigPath,
    ) -> crate::Result<RightSet> {
        for candidate in location.container().ancestors() {
            if let Some(descriptor) = self.policy.descriptor(&candidate)? {
                return Ok(descriptor.rights_of(principal));
            }
        }
        Ok(RightSet::empty())
    }
}
