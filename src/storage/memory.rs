//! In-memory serializer
//!
//! Keeps encoded unit documents in a shared map keyed by URI. Clones share
//! the same map, which lets a test inspect what a persister wrote and lets a
//! second project space reload it.

use crate::core::config::Encoding;
use crate::core::error::{Result, SerializationError};
use crate::core::types::UnitId;
use crate::graph::{PersistedUnit, Project};
use crate::storage::{Serializer, UnitDocument};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Serializer storing encoded units in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySerializer {
    units: Arc<DashMap<String, Vec<u8>>>,
    saves: Arc<AtomicUsize>,
    encoding: Encoding,
}

impl MemorySerializer {
    /// Create an empty store using JSON encoding
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with the given encoding
    pub fn with_encoding(encoding: Encoding) -> Self {
        Self {
            encoding,
            ..Self::default()
        }
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    /// Whether anything is stored at `uri`
    pub fn contains(&self, uri: &str) -> bool {
        self.units.contains_key(uri)
    }

    /// Number of stored units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Serializer for MemorySerializer {
    fn save(&self, project: &Project, unit: UnitId) -> Result<u64> {
        let document = UnitDocument::build(project, unit)?;
        let bytes = document.encode(self.encoding)?;
        let size = bytes.len() as u64;
        let uri = project
            .unit(unit)
            .map(|u| u.uri().to_string())
            .unwrap_or_default();
        self.units.insert(uri, bytes);
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(size)
    }

    fn load(&self, uri: &str) -> Result<UnitDocument> {
        let bytes = self
            .units
            .get(uri)
            .ok_or_else(|| SerializationError::UnresolvableUri(uri.to_string()))?;
        Ok(UnitDocument::decode(bytes.value(), self.encoding)?)
    }

    fn stored_size(&self, unit: &PersistedUnit) -> Option<u64> {
        self.units.get(unit.uri()).map(|b| b.len() as u64)
    }

    fn delete(&self, unit: &PersistedUnit) -> Result<()> {
        self.units.remove(unit.uri());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProjectId;
    use crate::graph::NodeSnapshot;
    use crate::storage::load_project;

    #[test]
    fn test_clones_share_storage() {
        let serializer = MemorySerializer::new();
        let other = serializer.clone();
        let mut p = Project::new(ProjectId::new(), "mem://main");
        let root = p.root();
        p.add_node(root, "items", NodeSnapshot::new("A")).unwrap();

        serializer.save(&p, p.main_unit()).unwrap();
        assert_eq!(other.save_count(), 1);
        assert!(other.contains("mem://main"));

        let restored = load_project(&other, p.id(), "mem://main").unwrap();
        assert_eq!(restored.content_snapshot(), p.content_snapshot());
    }

    #[test]
    fn test_missing_uri_fails_to_load() {
        let serializer = MemorySerializer::with_encoding(Encoding::Msgpack);
        assert!(serializer.load("mem://nowhere").is_err());
    }
}
