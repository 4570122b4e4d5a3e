//! Change notifications emitted by the project graph

use crate::core::types::{NodeId, UnitId, Value};
use crate::graph::node::NodeSnapshot;
use serde::{Deserialize, Serialize};

/// Kind of structural feature a change touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Plain value attribute
    Attribute,
    /// Non-containment reference list
    Reference,
    /// Containment list (parent/child)
    Containment,
}

/// Descriptor of the feature a change event refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    /// Feature name
    pub name: String,
    /// Feature kind
    pub kind: FeatureKind,
    /// Transient features are never persisted
    #[serde(default)]
    pub transient: bool,
}

impl Feature {
    /// Persisted attribute
    pub fn attribute(name: impl Into<String>) -> Self {
        Self::with_kind(name, FeatureKind::Attribute)
    }

    /// Cross reference list
    pub fn reference(name: impl Into<String>) -> Self {
        Self::with_kind(name, FeatureKind::Reference)
    }

    /// Containment list
    pub fn containment(name: impl Into<String>) -> Self {
        Self::with_kind(name, FeatureKind::Containment)
    }

    /// Mark the feature as transient
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    fn with_kind(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transient: false,
        }
    }
}

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Element added to a list feature
    Add,
    /// Element removed from a list feature
    Remove,
    /// Several elements removed at once
    RemoveMany,
    /// Single valued feature set
    Set,
    /// Single valued feature cleared
    Unset,
    /// Element moved within a list feature
    Move,
}

/// Record of one mutation of one node
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Node whose feature changed
    pub node: NodeId,
    /// Feature that changed
    pub feature: Feature,
    /// Kind of change
    pub kind: ChangeKind,
    /// Value before the change
    pub old: Option<Value>,
    /// Value after the change
    pub new: Option<Value>,
    /// Position inside a list feature
    pub index: Option<usize>,
}

impl ChangeEvent {
    /// A change whose old and new values are equal modifies nothing
    pub fn is_touch(&self) -> bool {
        self.old == self.new
    }
}

/// Position of a node inside its container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainmentSlot {
    /// Container node
    pub parent: NodeId,
    /// Containment feature on the container
    pub feature: String,
    /// Index inside the containment list
    pub index: usize,
}

impl ContainmentSlot {
    /// Slot at `index` of `feature` on `parent`
    pub fn new(parent: NodeId, feature: impl Into<String>, index: usize) -> Self {
        Self {
            parent,
            feature: feature.into(),
            index,
        }
    }
}

/// A node detached by a removal, with the unit bookkeeping it carried
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedNode {
    /// Node state at removal time
    pub snapshot: NodeSnapshot,
    /// Unit the node was persisted in
    pub unit: Option<UnitId>,
    /// Whether the node was a direct content of `unit`
    pub unit_root: bool,
}

/// Notification delivered to project observers
///
/// Structural events (`NodeAdded`, `NodeRemoved`) are emitted before the
/// `Changed` event on the container's containment list. A move emits
/// `NodeMoved` followed by the removal from the old list and the addition to
/// the new one.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    /// A feature value changed
    Changed(ChangeEvent),
    /// A subtree was inserted; `snapshot` lists it in pre-order
    NodeAdded {
        /// Root of the inserted subtree
        node: NodeId,
        /// Where it was inserted
        slot: ContainmentSlot,
        /// Inserted nodes in pre-order
        snapshot: Vec<NodeSnapshot>,
    },
    /// A node changed container
    NodeMoved {
        /// Moved node
        node: NodeId,
        /// Previous position
        from: ContainmentSlot,
        /// New position
        to: ContainmentSlot,
    },
    /// A subtree was detached and dropped
    NodeRemoved {
        /// Root of the removed subtree
        node: NodeId,
        /// Where it used to live
        slot: ContainmentSlot,
        /// Removed nodes in pre-order
        removed: Vec<RemovedNode>,
    },
    /// The whole project was deleted
    CollectionDeleted,
}

impl ProjectEvent {
    /// Inner change record, if this is a feature change
    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            ProjectEvent::Changed(change) => Some(change),
            _ => None,
        }
    }
}
