//! Hierarchical node paths.

use crate::error::{StoreError, StoreResult};
use std::fmt;

/// Characters that may not appear in a path segment.
pub const FORBIDDEN_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// A normalized path to one node of the remote tree.
///
/// Paths are sequences of non-empty segments. Leading, trailing and
/// repeated slashes are ignored when parsing, so `"/users//alice/"` and
/// `"users/alice"` name the same node.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Returns the root path.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a slash-separated path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if a segment contains one of
    /// [`FORBIDDEN_CHARS`] or an ASCII control character.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let mut segments = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            validate_segment(raw, segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the last segment, or `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns the parent path, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Returns the path of a descendant.
    ///
    /// `relative` may itself contain slashes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if `relative` is empty or invalid.
    pub fn child(&self, relative: &str) -> StoreResult<Path> {
        let tail = Path::parse(relative)?;
        if tail.is_root() {
            return Err(StoreError::invalid_path(relative, "empty child key"));
        }
        let mut segments = self.segments.clone();
        segments.extend(tail.segments);
        Ok(Self { segments })
    }

    /// Returns true if `other` equals this path or lies beneath it.
    pub fn contains(&self, other: &Path) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Returns true if either path contains the other.
    pub fn is_related(&self, other: &Path) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Appends a segment known to be valid (generated keys).
    pub(crate) fn push_unchecked(&self, segment: String) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }
}

fn validate_segment(raw: &str, segment: &str) -> StoreResult<()> {
    if let Some(c) = segment.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(StoreError::invalid_path(
            raw,
            format!("segment {segment:?} contains forbidden character {c:?}"),
        ));
    }
    if segment.chars().any(|c| c.is_ascii_control()) {
        return Err(StoreError::invalid_path(
            raw,
            format!("segment {segment:?} contains a control character"),
        ));
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}
