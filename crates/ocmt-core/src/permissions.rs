//! The fixed permission lattice for capability scopes
//!
//! Scopes are plain subsets of a closed permission set. Approvals may only
//! ever shrink a requested scope, so the operations here are restriction
//! shaped: intersection and subset tests, never union with caller input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single permission in the fixed lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    /// Read a resource's data
    Read,
    /// Enumerate a resource's contents
    List,
    /// Create or modify data
    Write,
    /// Remove data
    Delete,
    /// Administrative operations on the resource itself
    Admin,
    /// Re-delegate the capability onward
    ShareFurther,
}

impl Permission {
    /// All permissions, in lattice order
    pub const ALL: [Permission; 6] = [
        Permission::Read,
        Permission::List,
        Permission::Write,
        Permission::Delete,
        Permission::Admin,
        Permission::ShareFurther,
    ];

    /// Wire name of this permission
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::List => "list",
            Permission::Write => "write",
            Permission::Delete => "delete",
            Permission::Admin => "admin",
            Permission::ShareFurther => "share-further",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "list" => Ok(Permission::List),
            "write" => Ok(Permission::Write),
            "delete" => Ok(Permission::Delete),
            "admin" => Ok(Permission::Admin),
            "share-further" => Ok(Permission::ShareFurther),
            other => Err(crate::Error::validation(format!(
                "unknown permission: {other}"
            ))),
        }
    }
}

/// A subset of the permission lattice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// The empty scope
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// The default agent ceiling: read-only access
    pub fn default_ceiling() -> Self {
        Self::from_iter([Permission::Read, Permission::List])
    }

    /// Whether the set contains the given permission
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Whether every permission in `self` also appears in `other`
    pub fn is_subset(&self, other: &PermissionSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Permissions present in both sets. Constraint application filters a
    /// requested scope through the original; it never extends it.
    pub fn intersect(&self, other: &PermissionSet) -> PermissionSet {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Permissions in `self` that fall outside `ceiling`
    pub fn exceeding(&self, ceiling: &PermissionSet) -> PermissionSet {
        Self(self.0.difference(&ceiling.0).copied().collect())
    }

    /// Insert a permission
    pub fn insert(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of permissions in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate in lattice order
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|p| p.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
