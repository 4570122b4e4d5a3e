//! Persisted units: ownership boundaries for serialization

use crate::core::types::{NodeId, UnitId};
use std::path::PathBuf;

const FILE_SCHEME: &str = "file://";

/// A set of nodes written to a single durable artifact
///
/// `contents` lists the unit roots: nodes stored in this unit whose container
/// (if any) lives elsewhere. Descendants of a root belong to the same unit
/// unless they are roots of another unit themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedUnit {
    pub(crate) id: UnitId,
    pub(crate) uri: String,
    pub(crate) contents: Vec<NodeId>,
}

impl PersistedUnit {
    pub(crate) fn new(id: UnitId, uri: impl Into<String>) -> Self {
        Self {
            id,
            uri: uri.into(),
            contents: Vec::new(),
        }
    }

    /// Unit identifier
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Location of the durable artifact
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Unit roots in insertion order
    pub fn contents(&self) -> &[NodeId] {
        &self.contents
    }

    /// File path of this unit, `None` when the URI does not name a file
    pub fn file_path(&self) -> Option<PathBuf> {
        uri_to_path(&self.uri)
    }
}

/// Resolve a `file://` URI or a plain path to a file path
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
        return (!path.is_empty()).then(|| PathBuf::from(path));
    }
    if uri.is_empty() || uri.contains("://") {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// Build a `file://` URI for a path
pub fn path_to_uri(path: &std::path::Path) -> String {
    format!("{}{}", FILE_SCHEME, path.display())
}

/// URI of a file named `file_name` in the same directory as `uri`
///
/// Keeps the URI style of `uri` (scheme or plain path).
pub fn sibling_uri(uri: &str, file_name: &str) -> Option<String> {
    let path = uri_to_path(uri)?;
    let sibling = match path.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    };
    if uri.starts_with(FILE_SCHEME) {
        Some(path_to_uri(&sibling))
    } else {
        Some(sibling.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_resolution() {
        assert_eq!(uri_to_path("file:///tmp/a.vgp"), Some(PathBuf::from("/tmp/a.vgp")));
        assert_eq!(uri_to_path("/tmp/a.vgp"), Some(PathBuf::from("/tmp/a.vgp")));
        assert_eq!(uri_to_path("mem://unit-1"), None);
        assert_eq!(uri_to_path("file://"), None);
        assert_eq!(uri_to_path(""), None);
    }

    #[test]
    fn test_sibling_uri_keeps_style() {
        assert_eq!(
            sibling_uri("file:///data/p/main.vgp", "frag1.vgf").as_deref(),
            Some("file:///data/p/frag1.vgf")
        );
        assert_eq!(sibling_uri("/data/p/main.vgp", "frag1.vgf").as_deref(), Some("/data/p/frag1.vgf"));
        assert_eq!(sibling_uri("mem://main", "frag1.vgf"), None);
    }

    #[test]
    fn test_path_to_uri_round_trip() {
        let path = PathBuf::from("/data/project/main.vgp");
        assert_eq!(uri_to_path(&path_to_uri(&path)), Some(path));
    }
}
