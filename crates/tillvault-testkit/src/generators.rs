//! Proptest generators for property-based testing.

use proptest::prelude::*;

use tillvault_core::{Principal, Right, RightSet, DEFAULT_ROOTS};

/// One of the default roots, in random letter case.
pub fn root() -> impl Strategy<Value = String> {
    (prop::sample::select(DEFAULT_ROOTS), any::<u64>()).prop_map(|(root, mask)| {
        root.chars()
            .enumerate()
            .map(|(i, c)| {
                if mask >> (i % 64) & 1 == 1 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    })
}

/// A legal path segment.
pub fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.-]{0,15}".prop_map(String::from)
}

/// A container path below a root, with 0..=`max_segments` segments.
pub fn container_path(max_segments: usize) -> impl Strategy<Value = String> {
    (root(), prop::collection::vec(segment(), 0..=max_segments))
        .prop_map(|(root, segments)| join(root, &segments))
}

/// A value path: root, up to four containers, then a value name.
pub fn value_path() -> impl Strategy<Value = String> {
    (container_path(4), segment(), prop::bool::ANY).prop_map(|(container, name, slash)| {
        let sep = if slash { '/' } else { '\\' };
        format!("{container}{sep}{name}")
    })
}

/// A principal name.
pub fn principal_name() -> impl Strategy<Value = Principal> {
    "[a-z][a-z0-9.-]{0,23}".prop_map(Principal::new)
}

/// A single right.
pub fn right() -> impl Strategy<Value = Right> {
    prop::sample::select(Right::ALL.to_vec())
}

/// Any set of rights.
pub fn right_set() -> impl Strategy<Value = RightSet> {
    prop::collection::vec(right(), 0..=Right::ALL.len()).prop_map(RightSet::from)
}

/// A stored value: JSON-ish text including multi-byte characters.
pub fn value_text(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..=max_len).prop_map(|chars| chars.into_iter().collect())
}

fn join(root: String, segments: &[String]) -> String {
    segments.iter().fold(root, |mut path, segment| {
        path.push('\\');
        path.push_str(segment);
        path
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillvault_core::PathResolver;

    proptest! {
        #[test]
        fn test_generated_value_paths_resolve(raw in value_path()) {
            let path = PathResolver::default().resolve(&raw).unwrap();
            prop_assert!(path.is_value());
        }

        #[test]
        fn test_generated_containers_resolve(raw in container_path(6)) {
            let path = PathResolver::default().resolve_container(&raw).unwrap();
            prop_assert!(!path.is_value());
        }
    }
}
