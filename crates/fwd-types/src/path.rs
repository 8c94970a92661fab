//! Schema path identifiers with structural equality and wildcard matching.

use crate::ParseError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Key selector of a list segment.
///
/// `Any` addresses every instance of the list (the `[*]` wildcard),
/// `Exact` addresses one instance by its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySelector {
    /// All instances of the list.
    Any,
    /// One list instance.
    Exact(String),
}

impl KeySelector {
    /// Creates an exact key selector.
    pub fn exact(key: impl Into<String>) -> Self {
        KeySelector::Exact(key.into())
    }

    /// Returns true if this is the wildcard selector.
    pub fn is_any(&self) -> bool {
        matches!(self, KeySelector::Any)
    }

    /// Returns the exact key, if any.
    pub fn as_exact(&self) -> Option<&str> {
        match self {
            KeySelector::Any => None,
            KeySelector::Exact(key) => Some(key),
        }
    }

    /// Returns true if `other` is selected by this selector.
    ///
    /// The wildcard accepts every key (and itself), an exact key accepts only
    /// the same exact key.
    pub fn accepts(&self, other: &KeySelector) -> bool {
        match self {
            KeySelector::Any => true,
            KeySelector::Exact(key) => matches!(other, KeySelector::Exact(o) if o == key),
        }
    }
}

/// One step of a [`SchemaPath`].
///
/// A segment without a key is a container node; a segment with a key
/// selector is a list node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSegment {
    name: String,
    key: Option<KeySelector>,
}

impl PathSegment {
    /// Creates a container segment.
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// Creates a wildcarded list segment.
    pub fn list(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Some(KeySelector::Any),
        }
    }

    /// Creates a keyed list segment.
    pub fn keyed(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Some(KeySelector::Exact(key.into())),
        }
    }

    /// Returns the node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key selector (None for container nodes).
    pub fn key(&self) -> Option<&KeySelector> {
        self.key.as_ref()
    }

    /// Returns the exact key for keyed list segments.
    pub fn exact_key(&self) -> Option<&str> {
        self.key.as_ref().and_then(KeySelector::as_exact)
    }

    /// Returns true if this segment is a list node.
    pub fn is_list(&self) -> bool {
        self.key.is_some()
    }

    /// Returns true if this segment addresses all list instances.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.key, Some(KeySelector::Any))
    }

    /// Returns the schema form of this segment (exact keys become `*`).
    pub fn to_schema(&self) -> PathSegment {
        Self {
            name: self.name.clone(),
            key: self.key.as_ref().map(|_| KeySelector::Any),
        }
    }

    /// Returns true if this segment is selected by `pattern`.
    pub fn matches(&self, pattern: &PathSegment) -> bool {
        if self.name != pattern.name {
            return false;
        }
        match (&self.key, &pattern.key) {
            (None, None) => true,
            (Some(key), Some(selector)) => selector.accepts(key),
            _ => false,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.name, &['/', '[', ']', '\\'])?;
        match &self.key {
            None => Ok(()),
            Some(KeySelector::Any) => f.write_str("[*]"),
            Some(KeySelector::Exact(key)) => {
                f.write_str("[")?;
                write_escaped(f, key, &[']', '\\', '*'])?;
                f.write_str("]")
            }
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str, special: &[char]) -> fmt::Result {
    for c in s.chars() {
        if special.contains(&c) {
            write!(f, "\\{}", c)?;
        } else {
            write!(f, "{}", c)?;
        }
    }
    Ok(())
}

/// Structural identifier of a node in the data tree.
///
/// A path is an ordered sequence of [`PathSegment`]s starting at the tree
/// root. Equality, ordering and hashing are structural. A path containing
/// at least one `[*]` segment is *wildcarded* and denotes every matching
/// instance.
///
/// # Examples
///
/// ```
/// use fwd_types::SchemaPath;
///
/// let sub_if = SchemaPath::root()
///     .keyed("interface", "eth0")
///     .child("sub-interfaces")
///     .keyed("sub-interface", "100");
///
/// assert_eq!(sub_if.to_string(), "/interface[eth0]/sub-interfaces/sub-interface[100]");
/// assert_eq!(sub_if.schema().to_string(), "/interface[*]/sub-interfaces/sub-interface[*]");
/// assert!(sub_if.matches(&sub_if.schema()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaPath {
    segments: Vec<PathSegment>,
}

impl SchemaPath {
    /// Returns the root path (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Creates a path from segments.
    pub fn from_segments(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Returns a new path with a container segment appended.
    pub fn child(&self, name: impl Into<String>) -> Self {
        self.append(PathSegment::node(name))
    }

    /// Returns a new path with a wildcarded list segment appended.
    pub fn list(&self, name: impl Into<String>) -> Self {
        self.append(PathSegment::list(name))
    }

    /// Returns a new path with a keyed list segment appended.
    pub fn keyed(&self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.append(PathSegment::keyed(name, key))
    }

    /// Returns a new path with `segment` appended.
    pub fn append(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Returns a new path with all segments of `suffix` appended.
    pub fn concat(&self, suffix: &SchemaPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(suffix.segments.iter().cloned());
        Self { segments }
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the last segment.
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Returns the parent path, or None for the root.
    pub fn parent(&self) -> Option<SchemaPath> {
        if self.segments.is_empty() {
            None
        } else {
            Some(self.truncate(self.segments.len() - 1))
        }
    }

    /// Returns the first `len` segments as a new path.
    pub fn truncate(&self, len: usize) -> SchemaPath {
        Self {
            segments: self.segments.iter().take(len).cloned().collect(),
        }
    }

    /// Returns true if any segment is a `[*]` wildcard.
    pub fn is_wildcarded(&self) -> bool {
        self.segments.iter().any(PathSegment::is_wildcard)
    }

    /// Returns the position of the first wildcard segment.
    pub fn first_wildcard(&self) -> Option<usize> {
        self.segments.iter().position(PathSegment::is_wildcard)
    }

    /// Returns the schema form of this path: every exact key replaced with `*`.
    ///
    /// Handlers are registered and looked up by schema form.
    pub fn schema(&self) -> SchemaPath {
        Self {
            segments: self.segments.iter().map(PathSegment::to_schema).collect(),
        }
    }

    /// Returns true if no segment carries an exact key.
    pub fn is_schema(&self) -> bool {
        self.segments.iter().all(|s| s.exact_key().is_none())
    }

    /// Returns a new path with the key of segment `index` replaced.
    ///
    /// Returns None if `index` is out of range or the segment is not a list.
    pub fn with_key(&self, index: usize, key: impl Into<String>) -> Option<SchemaPath> {
        let segment = self.segments.get(index)?;
        if !segment.is_list() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments[index] = PathSegment::keyed(segment.name.clone(), key);
        Some(Self { segments })
    }

    /// Returns true if `prefix` is a structural prefix of this path
    /// (every path starts with itself and with the root).
    pub fn starts_with(&self, prefix: &SchemaPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Returns true if this path is a proper structural prefix of `other`.
    pub fn is_ancestor_of(&self, other: &SchemaPath) -> bool {
        other.len() > self.len() && other.starts_with(self)
    }

    /// Returns true if this path has the same length as `pattern` and every
    /// segment is selected by the corresponding pattern segment.
    pub fn matches(&self, pattern: &SchemaPath) -> bool {
        self.len() == pattern.len() && self.matches_prefix(pattern)
    }

    /// Returns true if the first `pattern.len()` segments of this path are
    /// selected by `pattern`.
    pub fn matches_prefix(&self, pattern: &SchemaPath) -> bool {
        pattern.len() <= self.len()
            && self
                .segments
                .iter()
                .zip(pattern.segments.iter())
                .all(|(segment, selector)| segment.matches(selector))
    }

    /// Cuts this path down to the instance of `pattern` it lies under.
    ///
    /// For `/a[1]/b/c[2]` and pattern `/a[*]/b` this returns `/a[1]/b`.
    pub fn cut_to(&self, pattern: &SchemaPath) -> Option<SchemaPath> {
        if self.matches_prefix(pattern) {
            Some(self.truncate(pattern.len()))
        } else {
            None
        }
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for SchemaPath {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| ParseError::invalid_path(s, "must start with '/'"))?;

        let mut path = SchemaPath::root();
        if rest.is_empty() {
            return Ok(path);
        }

        let mut chars = rest.chars().peekable();
        loop {
            let mut name = String::new();
            loop {
                match chars.peek().copied() {
                    None | Some('/') | Some('[') => break,
                    Some(']') => return Err(ParseError::invalid_path(s, "unexpected ']'")),
                    Some('\\') => {
                        chars.next();
                        let c = chars
                            .next()
                            .ok_or_else(|| ParseError::invalid_path(s, "dangling escape"))?;
                        name.push(c);
                    }
                    Some(c) => {
                        chars.next();
                        name.push(c);
                    }
                }
            }
            if name.is_empty() {
                return Err(ParseError::invalid_path(s, "empty segment name"));
            }

            let key = if chars.peek() == Some(&'[') {
                chars.next();
                let mut key = String::new();
                let mut escaped = false;
                loop {
                    match chars.next() {
                        None => return Err(ParseError::invalid_path(s, "unterminated key")),
                        Some(']') => break,
                        Some('\\') => {
                            let c = chars
                                .next()
                                .ok_or_else(|| ParseError::invalid_path(s, "dangling escape"))?;
                            key.push(c);
                            escaped = true;
                        }
                        Some(c) => key.push(c),
                    }
                }
                if key.is_empty() {
                    return Err(ParseError::invalid_path(s, "empty key"));
                }
                if key == "*" && !escaped {
                    Some(KeySelector::Any)
                } else {
                    Some(KeySelector::Exact(key))
                }
            } else {
                None
            };

            path.segments.push(PathSegment { name, key });

            match chars.next() {
                None => break,
                Some('/') => {
                    if chars.peek().is_none() {
                        return Err(ParseError::invalid_path(s, "trailing '/'"));
                    }
                }
                Some(c) => {
                    return Err(ParseError::invalid_path(
                        s,
                        format!("unexpected '{}' after key", c),
                    ))
                }
            }
        }

        Ok(path)
    }
}

impl Serialize for SchemaPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
