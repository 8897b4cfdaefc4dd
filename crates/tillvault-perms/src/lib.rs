//! # Tillvault Permissions
//!
//! Rights evaluation for configuration paths.
//!
//! ## Overview
//!
//! Every store operation names the rights it needs (`Read`, `Write`,
//! `Delete`, `CreateContainer`, or the `FullControl` superset). The
//! [`PermissionGate`] compares those against what an [`AccessPolicy`] says
//! the acting principal holds and returns a [`PermissionCheckResult`].
//!
//! The gate has no side effects. Denials are audited by the caller.
//!
//! ## Key Types
//!
//! - [`AccessPolicy`]: identity + rights source (the platform ACL facility)
//! - [`AclTable`]: in-process policy with grant/revoke administration
//! - [`SecurityDescriptor`]: per-location principal → rights map

pub mod error;
pub mod gate;
pub mod policy;

pub use error::{PermsError, Result};
pub use gate::{DenialCode, PermissionCheckResult, PermissionGate};
pub use policy::{AccessPolicy, AclTable, SecurityDescriptor};
