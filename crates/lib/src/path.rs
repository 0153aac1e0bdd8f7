//! Key paths for addressing values inside nested nodes.
//!
//! A [`KeyPath`] is an ordered list of [`Segment`]s. Object nodes are addressed with string
//! keys, array nodes with dense integer indices. Paths are loose until they are resolved
//! against a node: a numeric string such as `"2"` becomes an index when it meets an array
//! node, and an index becomes a string key when it meets an object node.
//!
//! # Usage
//!
//! ```rust
//! use livenode::path::{KeyPath, Segment};
//!
//! // Parse a delimited string (empty components are dropped)
//! let path = KeyPath::parse("user..profile.name", '.');
//! assert_eq!(path.len(), 3);
//!
//! // Build incrementally
//! let path = KeyPath::new().push("list").push(0usize);
//! assert_eq!(path.to_string(), "list.0");
//! assert_eq!(path.last(), Some(&Segment::Index(0)));
//! ```

use std::{fmt, ops::Deref, str::FromStr};

use serde::{Deserialize, Serialize};

/// Names that cannot be used as object keys.
///
/// These mirror the node's accessor surface so that flattened views and property-style
/// wrappers built on top of a node never shadow a method.
pub const RESERVED_KEYS: &[&str] = &[
    "get", "set", "delete", "has", "keys", "values", "entries", "len", "value", "copy", "assign",
    "combine", "replace", "empty", "reset", "on", "off", "once", "emit",
];

/// One component of a [`KeyPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// A position in an array node.
    Index(usize),
    /// A key in an object node.
    Key(String),
}

impl Segment {
    /// Interpret this segment as an array index, parsing numeric strings.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(k) => k.parse().ok(),
        }
    }

    /// Whether this segment addresses an array slot (an index or a numeric string).
    pub fn is_numeric(&self) -> bool {
        self.as_index().is_some()
    }

    /// The segment as a string key.
    pub fn to_key(&self) -> String {
        match self {
            Segment::Index(i) => i.to_string(),
            Segment::Key(k) => k.clone(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "{i}"),
            Segment::Key(k) => f.write_str(k),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Key(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Key(s)
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

/// An owned path into a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPath(Vec<Segment>);

impl KeyPath {
    /// Creates an empty path.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a path holding a single segment.
    pub fn single(segment: impl Into<Segment>) -> Self {
        Self(vec![segment.into()])
    }

    /// Splits a delimited string into a path, dropping empty components.
    pub fn parse(input: &str, delim: char) -> Self {
        Self(
            input
                .split(delim)
                .filter(|component| !component.is_empty())
                .map(Segment::from)
                .collect(),
        )
    }

    /// Appends a segment, builder style.
    pub fn push(mut self, segment: impl Into<Segment>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// Returns a new path with `segment` in front of this one.
    pub fn prefixed(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(segment);
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    /// Joins this path onto `base`.
    pub fn joined_to(&self, base: &[Segment]) -> Self {
        Self(base.iter().chain(self.0.iter()).cloned().collect())
    }

    /// Removes and returns the first segment.
    pub(crate) fn pop_front(&mut self) -> Option<Segment> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }

    /// Replaces the first segment with its resolved form.
    pub(crate) fn set_first(&mut self, segment: Segment) {
        if let Some(first) = self.0.first_mut() {
            *first = segment;
        }
    }

    /// Removes and returns the last segment.
    pub(crate) fn pop(&mut self) -> Option<Segment> {
        self.0.pop()
    }

    /// Whether this path addresses a value below the local level.
    pub fn is_nested(&self) -> bool {
        self.0.len() > 1
    }

    /// The segments of this path.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Joins the segments with a custom delimiter.
    pub fn join(&self, delim: char) -> String {
        let mut out = String::new();
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(delim);
            }
            out.push_str(&segment.to_key());
        }
        out
    }
}

impl Deref for KeyPath {
    type Target = [Segment];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join('.'))
    }
}

impl FromStr for KeyPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s, '.'))
    }
}

impl From<Vec<Segment>> for KeyPath {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl From<&[Segment]> for KeyPath {
    fn from(segments: &[Segment]) -> Self {
        Self(segments.to_vec())
    }
}

impl From<Segment> for KeyPath {
    fn from(segment: Segment) -> Self {
        Self(vec![segment])
    }
}

impl FromIterator<Segment> for KeyPath {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Any of the accepted ways to name a key: a scalar, a delimited string or a path.
///
/// Strings are split on the receiving node's delimiter. Integers must be non-negative.
#[derive(Clone, Debug, PartialEq)]
pub enum PathArg {
    Text(String),
    Index(i64),
    Path(KeyPath),
}

impl From<&str> for PathArg {
    fn from(s: &str) -> Self {
        PathArg::Text(s.to_string())
    }
}

impl From<String> for PathArg {
    fn from(s: String) -> Self {
        PathArg::Text(s)
    }
}

impl From<&String> for PathArg {
    fn from(s: &String) -> Self {
        PathArg::Text(s.clone())
    }
}

impl From<usize> for PathArg {
    fn from(i: usize) -> Self {
        PathArg::Index(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<i32> for PathArg {
    fn from(i: i32) -> Self {
        PathArg::Index(i64::from(i))
    }
}

impl From<i64> for PathArg {
    fn from(i: i64) -> Self {
        PathArg::Index(i)
    }
}

impl From<Segment> for PathArg {
    fn from(segment: Segment) -> Self {
        PathArg::Path(KeyPath::single(segment))
    }
}

impl From<&Segment> for PathArg {
    fn from(segment: &Segment) -> Self {
        PathArg::Path(KeyPath::single(segment.clone()))
    }
}

impl From<KeyPath> for PathArg {
    fn from(path: KeyPath) -> Self {
        PathArg::Path(path)
    }
}

impl From<&KeyPath> for PathArg {
    fn from(path: &KeyPath) -> Self {
        PathArg::Path(path.clone())
    }
}

impl From<Vec<Segment>> for PathArg {
    fn from(segments: Vec<Segment>) -> Self {
        PathArg::Path(KeyPath::from(segments))
    }
}

impl From<&[&str]> for PathArg {
    fn from(keys: &[&str]) -> Self {
        PathArg::Path(keys.iter().map(|k| Segment::from(*k)).collect())
    }
}
