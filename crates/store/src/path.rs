//! Hierarchical store paths

use std::fmt;

/// A slash-separated path into the document tree, e.g.
/// `rooms/AB3F9K/participants/<id>/presence/last_seen`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The tree root.
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parse a path, ignoring empty segments.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Append one segment.
    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.as_ref().to_string());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `self` is `other` or an ancestor of it.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// True when the two paths overlap (one contains the other), which
    /// means a write at one is observable at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_empty_segments() {
        let path = StorePath::parse("/rooms//AB3F9K/");
        assert_eq!(path.segments(), ["rooms", "AB3F9K"]);
    }

    #[test]
    fn test_child_builds_nested() {
        let path = StorePath::root().child("rooms").child("AB3F9K");
        assert_eq!(path, StorePath::parse("rooms/AB3F9K"));
        assert_eq!(path.to_string(), "/rooms/AB3F9K");
    }

    #[test]
    fn test_containment() {
        let rooms = StorePath::parse("rooms");
        let room = StorePath::parse("rooms/AB3F9K");
        assert!(rooms.contains(&room));
        assert!(!room.contains(&rooms));
        assert!(room.contains(&room));
        assert!(StorePath::root().contains(&room));
    }

    #[test]
    fn test_overlap() {
        let a = StorePath::parse("rooms/AB3F9K");
        let b = StorePath::parse("rooms/AB3F9K/state");
        let c = StorePath::parse("rooms/ZZZZZZ");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }
}
