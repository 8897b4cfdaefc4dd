//! Rights: the atomic capabilities checked before every operation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An atomic capability on a configuration location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Right {
    Read,
    Write,
    Delete,
    CreateContainer,
    /// Superset of every other right.
    FullControl,
}

impl Right {
    /// Every right, in declaration order.
    pub const ALL: [Right; 5] = [
        Right::Read,
        Right::Write,
        Right::Delete,
        Right::CreateContainer,
        Right::FullControl,
    ];

    const fn bit(self) -> u8 {
        match self {
            Right::Read => 0b0_0001,
            Right::Write => 0b0_0010,
            Right::Delete => 0b0_0100,
            Right::CreateContainer => 0b0_1000,
            Right::FullControl => 0b1_0000,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Right::Read => "Read",
            Right::Write => "Write",
            Right::Delete => "Delete",
            Right::CreateContainer => "CreateContainer",
            Right::FullControl => "FullControl",
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of rights, stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Right>", into = "Vec<Right>")]
pub struct RightSet(u8);

impl RightSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// A set holding only `FullControl`, which satisfies every right.
    pub const fn full_control() -> Self {
        Self(Right::FullControl.bit())
    }

    /// Build from a slice of rights.
    pub fn of(rights: &[Right]) -> Self {
        rights.iter().copied().collect()
    }

    /// Add a right.
    pub const fn with(self, right: Right) -> Self {
        Self(self.0 | right.bit())
    }

    /// Whether the right is literally present in the set.
    pub const fn contains(&self, right: Right) -> bool {
        self.0 & right.bit() != 0
    }

    /// Whether holding this set satisfies `right` (FullControl implies all).
    pub const fn satisfies(&self, right: Right) -> bool {
        self.contains(right) || self.contains(Right::FullControl)
    }

    /// Union of two sets.
    pub const fn union(self, other: RightSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Rights in `required` that this set does not satisfy.
    pub fn missing(&self, required: RightSet) -> Vec<Right> {
        required.iter().filter(|r| !self.satisfies(*r)).collect()
    }

    /// Iterate over the rights in the set.
    pub fn iter(&self) -> impl Iterator<Item = Right> {
        let bits = self.0;
        Right::ALL.into_iter().filter(move |r| bits & r.bit() != 0)
    }
}

impl FromIterator<Right> for RightSet {
    fn from_iter<I: IntoIterator<Item = Right>>(iter: I) -> Self {
        iter.into_iter().fold(RightSet::empty(), RightSet::with)
    }
}

impl From<Right> for RightSet {
    fn from(right: Right) -> Self {
        RightSet::empty().with(right)
    }
}

impl From<Vec<Right>> for RightSet {
    fn from(rights: Vec<Right>) -> Self {
        rights.into_iter().collect()
    }
}

impl From<RightSet> for Vec<Right> {
    fn from(set: RightSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for RightSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for RightSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(|r| r.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_control_satisfies_everything() {
        let set = RightSet::full_control();
        for right in Right::ALL {
            assert!(set.satisfies(right));
        }
        assert!(!set.contains(Right::Read));
    }

    #[test]
    fn test_missing_rights() {
        let held = RightSet::from(Right::Write);
        assert_eq!(held.missing(RightSet::from(Right::Read)), vec![Right::Read]);
        assert!(held.missing(RightSet::from(Right::Write)).is_empty());

        let required = RightSet::of(&[Right::Write, Right::CreateContainer]);
        assert_eq!(held.missing(required), vec![Right::CreateContainer]);
    }

    #[test]
    fn test_full_control_only_satisfied_by_itself() {
        let held = RightSet::of(&[Right::Read, Right::Write, Right::Delete, Right::CreateContainer]);
        assert_eq!(held.missing(RightSet::full_control()), vec![Right::FullControl]);
    }

    #[test]
    fn test_serde_as_list() {
        let set = RightSet::of(&[Right::Read, Right::Delete]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["Read","Delete"]"#);
        let back: RightSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
