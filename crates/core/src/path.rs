//! Logical slash-separated paths into the collection tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized path from the root collection to a node.
///
/// The root is the empty path. Rendered without leading or trailing slash
/// (`user/calendar/event.ics`).
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalPath {
    segments: Vec<String>,
}

impl LogicalPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-separated path.
    ///
    /// Empty segments from leading, trailing or doubled separators are
    /// dropped, so `/`, `` and `//` all name the root.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments from the root toward the leaf.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Append one segment.
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// The parent path, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

impl fmt::Debug for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalPath(/{self})")
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<&str> for LogicalPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_forms() {
        for raw in ["", "/", "//"] {
            let path = LogicalPath::parse(raw);
            assert!(path.is_root(), "{raw:?} should be the root");
            assert_eq!(path.to_string(), "");
            assert!(path.parent().is_none());
        }
    }

    #[test]
    fn test_strips_separators() {
        let path = LogicalPath::parse("/user/calendar/");
        assert_eq!(path.segments(), ["user", "calendar"]);
        assert_eq!(path.to_string(), "user/calendar");
        assert_eq!(path.name(), Some("calendar"));
        assert_eq!(path.depth(), 2);
        assert_eq!(LogicalPath::parse("user//calendar"), path);
    }

    #[test]
    fn test_join_and_parent() {
        let path = LogicalPath::parse("user").join("calendar");
        assert_eq!(path.to_string(), "user/calendar");
        assert_eq!(path.parent().unwrap().to_string(), "user");
        assert!(path.parent().unwrap().parent().unwrap().is_root());
    }
}
