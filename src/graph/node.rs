//! Graph node implementation

use crate::core::types::{NodeId, UnitId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Graph node
///
/// Attributes and reference lists are keyed by feature name. Containment
/// lists hold child identifiers in order; every child points back to its
/// container through `container`.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) class: String,
    pub(crate) attributes: BTreeMap<String, Value>,
    pub(crate) transient: BTreeMap<String, Value>,
    pub(crate) references: BTreeMap<String, Vec<NodeId>>,
    pub(crate) containments: BTreeMap<String, Vec<NodeId>>,
    pub(crate) container: Option<(NodeId, String)>,
    /// Set when this node is a direct content of a persisted unit
    pub(crate) unit_root: Option<UnitId>,
}

impl Node {
    pub(crate) fn from_snapshot(snapshot: NodeSnapshot) -> Self {
        Self {
            id: snapshot.id,
            class: snapshot.class,
            attributes: snapshot.attributes,
            transient: BTreeMap::new(),
            references: snapshot.references,
            containments: snapshot.containments,
            container: None,
            unit_root: None,
        }
    }

    /// Node identifier
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Class name assigned by the type system
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Persisted attribute value
    pub fn attribute(&self, feature: &str) -> Option<&Value> {
        self.attributes.get(feature)
    }

    /// Transient attribute value (never serialized)
    pub fn transient_attribute(&self, feature: &str) -> Option<&Value> {
        self.transient.get(feature)
    }

    /// All persisted attributes
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Targets of a reference feature
    pub fn references(&self, feature: &str) -> &[NodeId] {
        self.references.get(feature).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Children held by a containment feature
    pub fn children(&self, feature: &str) -> &[NodeId] {
        self.containments.get(feature).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All children in feature order
    pub fn all_children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.containments.values().flatten().copied()
    }

    /// Container node and feature, `None` for the project root
    pub fn container(&self) -> Option<(NodeId, &str)> {
        self.container.as_ref().map(|(id, f)| (*id, f.as_str()))
    }

    /// Unit this node is a direct content of, if any
    pub fn unit_root(&self) -> Option<UnitId> {
        self.unit_root
    }

    /// Persistable snapshot of this node alone
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id,
            class: self.class.clone(),
            attributes: self.attributes.clone(),
            references: self.references.clone(),
            containments: self.containments.clone(),
        }
    }
}

/// Serializable state of a single node
///
/// Used for new nodes, for unit documents and inside operations. Containment
/// lists name children by identifier, so a snapshot of a subtree is the list
/// of its nodes in pre-order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node identifier
    pub id: NodeId,
    /// Class name
    pub class: String,
    /// Persisted attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    /// Reference lists
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, Vec<NodeId>>,
    /// Containment lists
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containments: BTreeMap<String, Vec<NodeId>>,
}

impl NodeSnapshot {
    /// Start a new node of the given class with a fresh identifier
    pub fn new(class: impl Into<String>) -> Self {
        Self::with_id(NodeId::new(), class)
    }

    /// Start a new node with a chosen identifier
    pub fn with_id(id: NodeId, class: impl Into<String>) -> Self {
        Self {
            id,
            class: class.into(),
            attributes: BTreeMap::new(),
            references: BTreeMap::new(),
            containments: BTreeMap::new(),
        }
    }

    /// Builder: set an attribute
    pub fn attribute(mut self, feature: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(feature.into(), value.into());
        self
    }

    /// Builder: append a reference target
    pub fn reference(mut self, feature: impl Into<String>, target: NodeId) -> Self {
        self.references.entry(feature.into()).or_default().push(target);
        self
    }

    pub(crate) fn child_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.containments.values().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_builder() {
        let target = NodeId::new();
        let snap = NodeSnapshot::new("Task")
            .attribute("name", "write docs")
            .attribute("priority", 2i64)
            .reference("blocks", target);

        assert_eq!(snap.class, "Task");
        assert_eq!(snap.attributes.get("priority"), Some(&Value::Int(2)));
        assert_eq!(snap.references.get("blocks"), Some(&vec![target]));
        assert_eq!(snap.child_ids().count(), 0);
    }

    #[test]
    fn test_node_from_snapshot_round_trip() {
        let snap = NodeSnapshot::new("Task").attribute("name", "a");
        let node = Node::from_snapshot(snap.clone());
        assert_eq!(node.snapshot(), snap);
        assert!(node.container().is_none());
        assert!(node.children("items").is_empty());
    }
}
