//! Dotted logical paths
//!
//! A [`LogicalPath`] names a loadable unit inside a tenant namespace, e.g.
//! `tenant.7.components.blog.entities`. Segments are restricted to ASCII
//! alphanumerics and `_` so a path can always be mirrored onto a filesystem
//! and onto storage object names.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Check a single path or label segment
#[inline]
#[must_use]
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Dotted hierarchical path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogicalPath(Vec<String>);

impl LogicalPath {
    /// Build from segments
    ///
    /// # Errors
    /// Returns error if any segment is empty or contains invalid characters
    pub fn new<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for seg in &segments {
            validate(seg)?;
        }
        Ok(Self(segments))
    }

    /// Empty path
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segments
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First segment
    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Last segment
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Append a segment
    ///
    /// # Errors
    /// Returns error if the segment is invalid
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, PathError> {
        let segment = segment.into();
        validate(&segment)?;
        let mut next = self.clone();
        next.0.push(segment);
        Ok(next)
    }

    /// Check if this path is a (non-strict) prefix of another
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Remainder of `self` after `prefix`
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Self) -> Option<&[String]> {
        prefix
            .is_prefix_of(self)
            .then(|| &self.0[prefix.0.len()..])
    }

    /// Join segments with a custom separator
    #[inline]
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.0.join(separator)
    }
}

fn validate(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        Err(PathError::EmptySegment)
    } else if is_valid_segment(segment) {
        Ok(())
    } else {
        Err(PathError::InvalidSegment(segment.to_string()))
    }
}

impl Display for LogicalPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for LogicalPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        Self::new(s.split('.'))
    }
}

impl serde::Serialize for LogicalPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for LogicalPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors related to logical paths and labels
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty segment in path
    #[error("path contains empty segment")]
    EmptySegment,

    /// Invalid segment characters
    #[error("invalid segment: {0} (must be alphanumeric or underscore)")]
    InvalidSegment(String),

    /// Label does not have a recognised shape
    #[error("malformed namespace label: {0}")]
    MalformedLabel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_paths() {
        let path: LogicalPath = "tenant.7.components.blog.entities".parse().unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(path.first(), Some("tenant"));
        assert_eq!(path.last(), Some("entities"));
        assert_eq!(path.to_string(), "tenant.7.components.blog.entities");
    }

    #[test]
    fn empty_string_is_root() {
        let path: LogicalPath = "".parse().unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn rejects_bad_segments() {
        assert_eq!("a..b".parse::<LogicalPath>(), Err(PathError::EmptySegment));
        assert!(matches!(
            "blog.entities-v2".parse::<LogicalPath>(),
            Err(PathError::InvalidSegment(_))
        ));
        assert!(LogicalPath::root().child("a/b").is_err());
    }

    #[test]
    fn strip_prefix_returns_remainder() {
        let prefix: LogicalPath = "tenant.7".parse().unwrap();
        let full: LogicalPath = "tenant.7.components.blog".parse().unwrap();
        assert_eq!(full.strip_prefix(&prefix), Some(&full.segments()[2..]));

        let other: LogicalPath = "tenant.8".parse().unwrap();
        assert_eq!(full.strip_prefix(&other), None);
    }

    #[test]
    fn child_appends() {
        let base: LogicalPath = "tenant".parse().unwrap();
        let path = base.child("7").unwrap().child("components").unwrap();
        assert_eq!(path.join("/"), "tenant/7/components");
    }
}
