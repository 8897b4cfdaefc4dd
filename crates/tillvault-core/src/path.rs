//! Hierarchical configuration paths.
//!
//! A raw path looks like `config\db\main`: a root identifier, zero or more
//! container segments, and an optional leaf value name. [`PathResolver`]
//! turns raw strings into [`ConfigPath`] values; everything downstream
//! works with the structured form only.

use std::fmt;

use crate::error::{ParseError, ParseErrorReason};

/// Canonical component separator.
pub const PATH_SEPARATOR: char = '\\';

/// Maximum number of components (root + segments + value name).
pub const MAX_DEPTH: usize = 32;

/// Maximum length of a single component, in characters.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Roots accepted when no explicit list is configured.
pub const DEFAULT_ROOTS: &[&str] = &["config", "system", "database", "printers"];

/// Structured locator into the hierarchical store.
///
/// Immutable once built. A path with a value name addresses a value; a path
/// without one addresses a container (the root alone is a container).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigPath {
    root: String,
    segments: Vec<String>,
    value_name: Option<String>,
}

impl ConfigPath {
    /// The root identifier, in its canonical spelling.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Container segments below the root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The leaf value name, if this path addresses a value.
    pub fn value_name(&self) -> Option<&str> {
        self.value_name.as_deref()
    }

    /// Whether this path addresses a value rather than a container.
    pub fn is_value(&self) -> bool {
        self.value_name.is_some()
    }

    /// Whether this path is a bare root container.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty() && self.value_name.is_none()
    }

    /// Number of components including the root.
    pub fn depth(&self) -> usize {
        1 + self.segments.len() + usize::from(self.value_name.is_some())
    }

    /// The last component: value name, last segment, or the root.
    pub fn name(&self) -> &str {
        self.value_name
            .as_deref()
            .or_else(|| self.segments.last().map(String::as_str))
            .unwrap_or(&self.root)
    }

    /// The container holding this path's value (or the path itself when it
    /// already addresses a container).
    pub fn container(&self) -> ConfigPath {
        ConfigPath {
            root: self.root.clone(),
            segments: self.segments.clone(),
            value_name: None,
        }
    }

    /// The enclosing container. `None` for a root.
    pub fn parent(&self) -> Option<ConfigPath> {
        if self.value_name.is_some() {
            return Some(self.container());
        }
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(ConfigPath {
            root: self.root.clone(),
            segments,
            value_name: None,
        })
    }

    /// This path followed by each enclosing container up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = ConfigPath> {
        std::iter::successors(Some(self.clone()), |p| p.parent())
    }

    /// Whether `other` lies strictly below this container.
    pub fn is_ancestor_of(&self, other: &ConfigPath) -> bool {
        !self.is_value()
            && self.root == other.root
            && other.depth() > self.depth()
            && other.segments.starts_with(&self.segments)
    }

    /// Append a container segment.
    ///
    /// Bounded by [`MAX_DEPTH`] only; [`PathResolver::join_container`]
    /// applies a resolver's own bound.
    pub fn join_container(&self, name: &str) -> Result<ConfigPath, ParseError> {
        let base = self.container();
        self.check_join(name, base.depth() + 1)?;
        let mut segments = base.segments;
        segments.push(name.to_string());
        Ok(ConfigPath {
            root: base.root,
            segments,
            value_name: None,
        })
    }

    /// Address a value inside this container.
    pub fn join_value(&self, name: &str) -> Result<ConfigPath, ParseError> {
        let base = self.container();
        self.check_join(name, base.depth() + 1)?;
        Ok(ConfigPath {
            value_name: Some(name.to_string()),
            ..base
        })
    }

    fn check_join(&self, name: &str, new_depth: usize) -> Result<(), ParseError> {
        let raw = format!("{}{}{}", self.container(), PATH_SEPARATOR, name);
        if !is_valid_segment(name) {
            return Err(ParseError::new(raw, ParseErrorReason::IllegalSegment));
        }
        if new_depth > MAX_DEPTH {
            return Err(ParseError::new(raw, ParseErrorReason::TooDeep));
        }
        Ok(())
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            write!(f, "{}{}", PATH_SEPARATOR, segment)?;
        }
        if let Some(ref value) = self.value_name {
            write!(f, "{}{}", PATH_SEPARATOR, value)?;
        }
        Ok(())
    }
}

/// How the last component of a raw path is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathKind {
    Value,
    Container,
}

/// Parses and validates raw configuration paths.
///
/// Pure: holds only the accepted roots and the depth bound.
#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: Vec<String>,
    max_depth: usize,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ROOTS.iter().copied(), MAX_DEPTH)
    }
}

impl PathResolver {
    /// Create a resolver accepting the given roots.
    ///
    /// `max_depth` is clamped to [`MAX_DEPTH`].
    pub fn new<I, R>(roots: I, max_depth: usize) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            max_depth: max_depth.clamp(1, MAX_DEPTH),
        }
    }

    /// Accepted roots, canonical spelling.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Append a container segment, within this resolver's depth bound.
    pub fn join_container(&self, base: &ConfigPath, name: &str) -> Result<ConfigPath, ParseError> {
        self.bounded(base.join_container(name)?)
    }

    /// Address a value inside `base`, within this resolver's depth bound.
    pub fn join_value(&self, base: &ConfigPath, name: &str) -> Result<ConfigPath, ParseError> {
        self.bounded(base.join_value(name)?)
    }

    fn bounded(&self, path: ConfigPath) -> Result<ConfigPath, ParseError> {
        if path.depth() > self.max_depth {
            return Err(ParseError::new(path.to_string(), ParseErrorReason::TooDeep));
        }
        Ok(path)
    }

    /// Resolve a value path: the last component is the value name.
    ///
    /// A bare root resolves to the root container.
    pub fn resolve(&self, raw: &str) -> Result<ConfigPath, ParseError> {
        self.parse(raw, PathKind::Value)
    }

    /// Resolve a container path: every component after the root is a
    /// container segment.
    pub fn resolve_container(&self, raw: &str) -> Result<ConfigPath, ParseError> {
        self.parse(raw, PathKind::Container)
    }

    fn parse(&self, raw: &str, kind: PathKind) -> Result<ConfigPath, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::new(raw, ParseErrorReason::EmptyPath));
        }

        let components: Vec<&str> = trimmed.split(is_separator).collect();

        // Roots compare case-insensitively, like registry hive names
        let root = self
            .roots
            .iter()
            .find(|r| r.eq_ignore_ascii_case(components[0]))
            .ok_or_else(|| ParseError::new(raw, ParseErrorReason::InvalidRoot))?;

        if components.len() > self.max_depth {
            return Err(ParseError::new(raw, ParseErrorReason::TooDeep));
        }

        let rest = &components[1..];
        if rest.iter().any(|c| !is_valid_segment(c)) {
            return Err(ParseError::new(raw, ParseErrorReason::IllegalSegment));
        }

        let (segments, value_name) = match (kind, rest.split_last()) {
            (PathKind::Value, Some((last, init))) => (init, Some(last.to_string())),
            _ => (rest, None),
        };

        Ok(ConfigPath {
            root: root.clone(),
            segments: segments.iter().map(|s| s.to_string()).collect(),
            value_name,
        })
    }
}

fn is_separator(c: char) -> bool {
    c == PATH_SEPARATOR || c == '/'
}

/// Whether a single component is acceptable.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.chars().count() <= MAX_SEGMENT_LEN
        && segment != "."
        && segment != ".."
        && segment.trim() == segment
        && !segment.chars().any(|c| is_separator(c) || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver() -> PathResolver {
        PathResolver::default()
    }

    #[test]
    fn test_resolve_value_path() {
        let path = resolver().resolve(r"config\db\main").unwrap();
        assert_eq!(path.root(), "config");
        assert_eq!(path.segments(), &["db".to_string()]);
        assert_eq!(path.value_name(), Some("main"));
        assert_eq!(path.to_string(), r"config\db\main");
        assert_eq!(path.depth(), 3);
    }

    #[test]
    fn test_resolve_container_path() {
        let path = resolver().resolve_container(r"config\db").unwrap();
        assert!(!path.is_value());
        assert_eq!(path.segments(), &["db".to_string()]);
        assert_eq!(path.name(), "db");
    }

    #[test]
    fn test_bare_root_is_container() {
        let path = resolver().resolve("CONFIG").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "config");
        assert!(path.parent().is_none());
    }

    #[test]
    fn test_forward_slash_canonicalizes() {
        let path = resolver().resolve("config/printers/receipt").unwrap();
        assert_eq!(path.to_string(), r"config\printers\receipt");
    }

    #[test]
    fn test_reason_codes() {
        let r = resolver();
        assert_eq!(r.resolve("   ").unwrap_err().reason, ParseErrorReason::EmptyPath);
        assert_eq!(r.resolve(r"registry\x").unwrap_err().reason, ParseErrorReason::InvalidRoot);
        assert_eq!(r.resolve(r"config\\x").unwrap_err().reason, ParseErrorReason::IllegalSegment);
        assert_eq!(r.resolve("config\\a\u{7}b").unwrap_err().reason, ParseErrorReason::IllegalSegment);
        assert_eq!(r.resolve(r"config\..\x").unwrap_err().reason, ParseErrorReason::IllegalSegment);

        let deep = std::iter::once("config")
            .chain(std::iter::repeat("s").take(MAX_DEPTH))
            .collect::<Vec<_>>()
            .join("\\");
        let err = r.resolve(&deep).unwrap_err();
        assert_eq!(err.reason, ParseErrorReason::TooDeep);
        assert_eq!(err.raw, deep);
    }

    #[test]
    fn test_parent_and_ancestors() {
        let path = resolver().resolve(r"config\a\b\v").unwrap();
        let names: Vec<String> = path.ancestors().map(|p| p.to_string()).collect();
        assert_eq!(
            names,
            vec![r"config\a\b\v", r"config\a\b", r"config\a", "config"]
        );
    }

    #[test]
    fn test_is_ancestor_of() {
        let r = resolver();
        let config = r.resolve_container("config").unwrap();
        let db = r.resolve_container(r"config\db").unwrap();
        let value = r.resolve(r"config\db\main").unwrap();
        let other = r.resolve_container(r"system\db").unwrap();

        assert!(config.is_ancestor_of(&value));
        assert!(db.is_ancestor_of(&value));
        assert!(!value.is_ancestor_of(&db));
        assert!(!other.is_ancestor_of(&value));
        assert!(!db.is_ancestor_of(&db));
    }

    #[test]
    fn test_join() {
        let db = resolver().resolve_container(r"config\db").unwrap();
        let value = db.join_value("main").unwrap();
        assert_eq!(value.to_string(), r"config\db\main");
        assert!(db.join_container("a\\b").is_err());
    }

    #[test]
    fn test_join_respects_resolver_depth() {
        let shallow = PathResolver::new(DEFAULT_ROOTS.iter().copied(), 3);
        let base = shallow.resolve_container(r"config\a\b").unwrap();

        let err = shallow.join_value(&base, "v").unwrap_err();
        assert_eq!(err.reason, ParseErrorReason::TooDeep);
        assert_eq!(err.raw, r"config\a\b\v");
        assert_eq!(
            shallow.join_container(&base, "c").unwrap_err().reason,
            ParseErrorReason::TooDeep
        );
        assert!(shallow.resolve(r"config\a\b\v").is_err());

        let parent = shallow.resolve_container(r"config\a").unwrap();
        assert_eq!(shallow.join_value(&parent, "v").unwrap().to_string(), r"config\a\v");
        // The unbounded join still builds the deeper path.
        assert!(base.join_value("v").is_ok());
    }

    fn segment() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_][A-Za-z0-9 _.-]{0,15}[A-Za-z0-9_]"
            .prop_filter("dot segments", |s| s != "." && s != "..")
    }

    proptest! {
        #[test]
        fn resolve_round_trips(
            segments in prop::collection::vec(segment(), 1..MAX_DEPTH),
        ) {
            let raw = format!("config\\{}", segments.join("\\"));
            let r = resolver();

            let path = r.resolve(&raw).unwrap();
            prop_assert_eq!(path.to_string(), raw.clone());
            prop_assert_eq!(r.resolve(&path.to_string()).unwrap(), path);

            let container = r.resolve_container(&raw).unwrap();
            prop_assert_eq!(container.to_string(), raw);
        }
    }
}
