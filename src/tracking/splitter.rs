//! Unit splitting heuristic
//!
//! Newly inserted nodes go to the splitter's active unit. Once that unit's
//! stored artifact grows past the configured threshold, the next inserted
//! node starts a fresh fragment unit next to it, which becomes the new active
//! unit. This bounds how large any single unit file grows during expansion.

use crate::core::config::PersistenceConfig;
use crate::core::error::{Error, Result};
use crate::core::types::{NodeId, UnitId};
use crate::graph::{sibling_uri, uri_to_path, Project};
use crate::storage::Serializer;
use crate::system::metrics::Metrics;
use tracing::debug;
use uuid::Uuid;

/// Where an inserted node ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Node stays in its natural unit
    Unchanged,
    /// Node became a root of the (existing) active unit
    MovedTo(UnitId),
    /// A new unit was created for the node
    Split {
        /// Unit that exceeded the threshold
        from: UnitId,
        /// Newly created unit
        to: UnitId,
    },
}

/// Unit splitter with an explicit active target
#[derive(Debug, Clone)]
pub struct UnitSplitter {
    enabled: bool,
    threshold: u64,
    extension: String,
    active: Option<UnitId>,
}

impl UnitSplitter {
    /// Create a splitter
    pub fn new(enabled: bool, threshold: u64, extension: impl Into<String>) -> Self {
        Self {
            enabled,
            threshold,
            extension: extension.into(),
            active: None,
        }
    }

    /// Create a splitter from the persistence configuration
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(
            config.resource_splitting,
            config.max_unit_size_on_expand,
            config.fragment_extension.clone(),
        )
    }

    /// Unit that receives the next inserted node
    pub fn active_unit(&self) -> Option<UnitId> {
        self.active
    }

    /// Whether splitting is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Forget the active unit
    pub fn reset(&mut self) {
        self.active = None;
    }

    /// Decide the unit of a freshly inserted node and apply the decision
    pub fn place<S: Serializer + ?Sized>(
        &mut self,
        project: &mut Project,
        node: NodeId,
        serializer: &S,
    ) -> Result<Placement> {
        if !self.enabled {
            return Ok(Placement::Unchanged);
        }
        let natural = project.unit_of(node).ok_or_else(|| {
            Error::illegal_state(format!("node {} is not part of a persisted unit", node))
        })?;

        // a unit dropped from the project can no longer receive nodes
        let active = self
            .active
            .filter(|u| project.unit(*u).is_some())
            .unwrap_or(natural);
        self.active = Some(active);

        let active_unit = project
            .unit(active)
            .ok_or_else(|| Error::illegal_state(format!("unit {} vanished", active)))?;
        if uri_to_path(active_unit.uri()).is_none() {
            return Err(Error::illegal_state(
                "project contains nodes that are not part of a file unit",
            ));
        }

        let stored = serializer.stored_size(active_unit).unwrap_or(0);
        if stored > self.threshold {
            let file_name = format!("frag{}{}", Uuid::new_v4().simple(), self.extension);
            let uri = sibling_uri(active_unit.uri(), &file_name).ok_or_else(|| {
                Error::illegal_state(format!("cannot place a fragment next to {}", active_unit.uri()))
            })?;

            let created = project.create_unit(uri);
            project.assign_to_unit(node, created)?;
            self.active = Some(created);

            Metrics::global().persistence.unit_splits.inc();
            debug!(
                from = %active,
                to = %created,
                stored_bytes = stored,
                threshold = self.threshold,
                "Split unit on expansion"
            );
            return Ok(Placement::Split {
                from: active,
                to: created,
            });
        }

        if active != natural {
            project.assign_to_unit(node, active)?;
            return Ok(Placement::MovedTo(active));
        }
        Ok(Placement::Unchanged)
    }
}
