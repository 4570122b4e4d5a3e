//! Storage layer for persisted units
//!
//! A [`Serializer`] turns one unit of a project into a durable artifact and
//! back. Units are written as [`UnitDocument`]s: the unit's roots plus every
//! node they transitively contain, stopping at nodes that are roots of another
//! unit (those are kept as plain identifiers in the containment list). The
//! main unit additionally carries the manifest of fragment units so a project
//! can be reassembled from its main URI alone.

pub mod file;
pub mod memory;

pub use file::FileSerializer;
pub use memory::MemorySerializer;

use crate::core::config::Encoding;
use crate::core::error::{Error, Result, SerializationError};
use crate::core::types::{NodeId, ProjectId, UnitId};
use crate::graph::{NodeSnapshot, PersistedUnit, Project};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Current unit document layout
pub const FORMAT_VERSION: u32 = 1;

/// Trait for unit serializer implementations
///
/// Implementations are shared between the persister and the project space,
/// so they must be cheap to clone and safe to call from several threads.
pub trait Serializer: Send + Sync {
    /// Write the current state of a unit
    ///
    /// # Arguments
    ///
    /// * `project` - The project owning the unit
    /// * `unit` - The unit to write
    ///
    /// # Returns
    ///
    /// * `Ok(bytes)` - Size of the written artifact
    /// * `Err(Error::Serialization)` - If encoding or writing failed
    fn save(&self, project: &Project, unit: UnitId) -> Result<u64>;

    /// Read a unit document back
    fn load(&self, uri: &str) -> Result<UnitDocument>;

    /// Size of the stored artifact, `None` when the unit was never written
    fn stored_size(&self, unit: &PersistedUnit) -> Option<u64>;

    /// Remove the stored artifact; missing artifacts are not an error
    fn delete(&self, unit: &PersistedUnit) -> Result<()>;
}

/// Fragment entry of the main unit manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentEntry {
    /// Fragment unit id
    pub unit: UnitId,
    /// Fragment location
    pub uri: String,
}

/// On-disk representation of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDocument {
    /// Layout version
    pub format: u32,
    /// Owning project
    pub project: ProjectId,
    /// Unit id
    pub unit: UnitId,
    /// Unit roots in content order
    pub roots: Vec<NodeId>,
    /// Every node stored in this unit, roots' subtrees in pre-order
    pub nodes: Vec<NodeSnapshot>,
    /// Fragment manifest, only present on the main unit
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<FragmentEntry>,
}

impl UnitDocument {
    /// Collect the current state of `unit`
    pub fn build(project: &Project, unit: UnitId) -> Result<Self> {
        let persisted = project
            .unit(unit)
            .ok_or_else(|| Error::illegal_state(format!("unit {} is not part of the project", unit)))?;

        let roots: Vec<NodeId> = persisted
            .contents()
            .iter()
            .copied()
            .filter(|id| project.contains(*id))
            .collect();

        let mut nodes = Vec::new();
        for root in &roots {
            let mut stack = vec![*root];
            while let Some(id) = stack.pop() {
                let Some(node) = project.node(id) else {
                    continue;
                };
                nodes.push(node.snapshot());
                let children: Vec<NodeId> = node
                    .all_children()
                    .filter(|child| project.unit_of(*child) == Some(unit))
                    .collect();
                stack.extend(children.into_iter().rev());
            }
        }

        let fragments = if unit == project.main_unit() {
            project
                .units()
                .filter(|u| u.id() != unit)
                .map(|u| FragmentEntry {
                    unit: u.id(),
                    uri: u.uri().to_string(),
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            format: FORMAT_VERSION,
            project: project.id(),
            unit,
            roots,
            nodes,
            fragments,
        })
    }

    /// Encode with the configured encoding
    pub fn encode(&self, encoding: Encoding) -> std::result::Result<Vec<u8>, SerializationError> {
        match encoding {
            Encoding::Json => Ok(serde_json::to_vec_pretty(self)?),
            Encoding::Msgpack => Ok(rmp_serde::to_vec_named(self)?),
        }
    }

    /// Decode bytes written by [`UnitDocument::encode`]
    pub fn decode(bytes: &[u8], encoding: Encoding) -> std::result::Result<Self, SerializationError> {
        let document: Self = match encoding {
            Encoding::Json => serde_json::from_slice(bytes)?,
            Encoding::Msgpack => rmp_serde::from_slice(bytes)?,
        };
        if document.format != FORMAT_VERSION {
            return Err(SerializationError::Corruption(format!(
                "unsupported unit format {}",
                document.format
            )));
        }
        Ok(document)
    }
}

/// Reassemble a project from its main unit and the fragments it lists
pub fn load_project<S: Serializer + ?Sized>(
    serializer: &S,
    project_id: ProjectId,
    main_uri: &str,
) -> Result<Project> {
    let main = serializer.load(main_uri)?;
    if main.project != project_id {
        return Err(SerializationError::Corruption(format!(
            "{} belongs to project {}, expected {}",
            main_uri, main.project, project_id
        ))
        .into());
    }

    let mut main_unit = PersistedUnit::new(main.unit, main_uri);
    main_unit.contents = main.roots;
    let mut units = vec![main_unit];
    let mut nodes = main.nodes;

    for fragment in &main.fragments {
        let document = serializer.load(&fragment.uri)?;
        if document.unit != fragment.unit {
            return Err(SerializationError::Corruption(format!(
                "{} holds unit {}, manifest expects {}",
                fragment.uri, document.unit, fragment.unit
            ))
            .into());
        }
        let mut unit = PersistedUnit::new(fragment.unit, fragment.uri.clone());
        unit.contents = document.roots;
        units.push(unit);
        nodes.extend(document.nodes);
    }

    debug!(
        project = %project_id,
        units = units.len(),
        nodes = nodes.len(),
        "Reassembled project from units"
    );
    Project::from_parts(project_id, units, nodes)
}
