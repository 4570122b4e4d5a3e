//! Invertible semantic operations recorded from project notifications
//!
//! The operation log of a project space is what gets committed. Every
//! operation carries enough state to be undone (`reverse`) and checks the
//! state it expects when applied, so replaying local work on top of server
//! changes detects operations that no longer fit.

use crate::core::error::{GraphError, Result};
use crate::core::types::{NodeId, Value};
use crate::graph::{ChangeKind, ContainmentSlot, FeatureKind, NodeSnapshot, Project, ProjectEvent};
use crate::tracking::FilterStack;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One semantic change of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Insert a subtree (pre-order snapshots) at a slot
    CreateNode {
        /// Insertion slot
        slot: ContainmentSlot,
        /// Subtree in pre-order
        nodes: Vec<NodeSnapshot>,
    },
    /// Remove a subtree that currently sits at a slot
    DeleteNode {
        /// Slot the subtree occupied
        slot: ContainmentSlot,
        /// Subtree in pre-order at removal time
        nodes: Vec<NodeSnapshot>,
    },
    /// Move a node between slots
    MoveNode {
        /// Moved node
        node: NodeId,
        /// Previous slot
        from: ContainmentSlot,
        /// New slot
        to: ContainmentSlot,
    },
    /// Set or clear an attribute
    SetAttribute {
        /// Target node
        node: NodeId,
        /// Attribute name
        feature: String,
        /// Expected current value
        old: Option<Value>,
        /// Value after the change, `None` clears
        new: Option<Value>,
    },
    /// Insert a reference target
    AddReference {
        /// Referencing node
        node: NodeId,
        /// Reference feature
        feature: String,
        /// Referenced node
        target: NodeId,
        /// Position in the list
        index: usize,
    },
    /// Remove a reference target
    RemoveReference {
        /// Referencing node
        node: NodeId,
        /// Reference feature
        feature: String,
        /// Referenced node
        target: NodeId,
        /// Position in the list
        index: usize,
    },
    /// Replace a whole reference list
    SetReferences {
        /// Referencing node
        node: NodeId,
        /// Reference feature
        feature: String,
        /// Expected current targets
        old: Vec<NodeId>,
        /// Targets after the change
        new: Vec<NodeId>,
    },
}

impl Operation {
    /// Record the operation a notification stands for
    ///
    /// Containment list changes are covered by the structural events and
    /// yield nothing, as do events the filter stack rejects.
    pub fn from_event(event: &ProjectEvent, filters: &FilterStack) -> Option<Operation> {
        match event {
            ProjectEvent::Changed(change) => {
                if !filters.accepts(change) {
                    return None;
                }
                let node = change.node;
                let feature = change.feature.name.clone();
                match change.feature.kind {
                    FeatureKind::Containment => None,
                    FeatureKind::Attribute => Some(Operation::SetAttribute {
                        node,
                        feature,
                        old: change.old.clone(),
                        new: change.new.clone(),
                    }),
                    FeatureKind::Reference => match change.kind {
                        ChangeKind::Add => Some(Operation::AddReference {
                            node,
                            feature,
                            target: node_ref(change.new.as_ref())?,
                            index: change.index?,
                        }),
                        ChangeKind::Remove => Some(Operation::RemoveReference {
                            node,
                            feature,
                            target: node_ref(change.old.as_ref())?,
                            index: change.index?,
                        }),
                        ChangeKind::RemoveMany | ChangeKind::Set | ChangeKind::Unset => {
                            Some(Operation::SetReferences {
                                node,
                                feature,
                                old: node_refs(change.old.as_ref()),
                                new: node_refs(change.new.as_ref()),
                            })
                        }
                        ChangeKind::Move => None,
                    },
                }
            }
            ProjectEvent::NodeAdded { slot, snapshot, .. } => Some(Operation::CreateNode {
                slot: slot.clone(),
                nodes: snapshot.clone(),
            }),
            ProjectEvent::NodeRemoved { slot, removed, .. } => Some(Operation::DeleteNode {
                slot: slot.clone(),
                nodes: removed.iter().map(|r| r.snapshot.clone()).collect(),
            }),
            ProjectEvent::NodeMoved { node, from, to } => Some(Operation::MoveNode {
                node: *node,
                from: from.clone(),
                to: to.clone(),
            }),
            ProjectEvent::CollectionDeleted => None,
        }
    }

    /// The operation undoing this one
    pub fn reverse(&self) -> Operation {
        match self.clone() {
            Operation::CreateNode { slot, nodes } => Operation::DeleteNode { slot, nodes },
            Operation::DeleteNode { slot, nodes } => Operation::CreateNode { slot, nodes },
            Operation::MoveNode { node, from, to } => Operation::MoveNode {
                node,
                from: to,
                to: from,
            },
            Operation::SetAttribute {
                node,
                feature,
                old,
                new,
            } => Operation::SetAttribute {
                node,
                feature,
                old: new,
                new: old,
            },
            Operation::AddReference {
                node,
                feature,
                target,
                index,
            } => Operation::RemoveReference {
                node,
                feature,
                target,
                index,
            },
            Operation::RemoveReference {
                node,
                feature,
                target,
                index,
            } => Operation::AddReference {
                node,
                feature,
                target,
                index,
            },
            Operation::SetReferences {
                node,
                feature,
                old,
                new,
            } => Operation::SetReferences {
                node,
                feature,
                old: new,
                new: old,
            },
        }
    }

    /// Apply to a project, failing without side effects when the project is
    /// not in the state the operation expects
    pub fn apply(&self, project: &mut Project) -> Result<()> {
        match self {
            Operation::CreateNode { slot, nodes } => {
                let len = existing(project, slot.parent)?.children(&slot.feature).len();
                let slot = ContainmentSlot::new(slot.parent, slot.feature.clone(), slot.index.min(len));
                project.insert_subtree(slot, nodes.clone())?;
            }
            Operation::DeleteNode { slot, nodes } => {
                let root = nodes
                    .first()
                    .map(|n| n.id)
                    .ok_or_else(|| GraphError::StateMismatch("empty delete".to_string()))?;
                expect_container(project, root, slot)?;
                project.remove_node(root)?;
            }
            Operation::MoveNode { node, from, to } => {
                expect_container(project, *node, from)?;
                let len = existing(project, to.parent)?.children(&to.feature).len();
                let same_list = from.parent == to.parent && from.feature == to.feature;
                let max = if same_list { len.saturating_sub(1) } else { len };
                let to = ContainmentSlot::new(to.parent, to.feature.clone(), to.index.min(max));
                project.move_node(*node, to)?;
            }
            Operation::SetAttribute {
                node,
                feature,
                old,
                new,
            } => {
                let current = existing(project, *node)?.attribute(feature);
                if current != old.as_ref() {
                    return Err(GraphError::StateMismatch(format!(
                        "attribute {} of {} changed underneath",
                        feature, node
                    ))
                    .into());
                }
                match new {
                    Some(value) => project.set_attribute(*node, feature, value.clone())?,
                    None => project.unset_attribute(*node, feature)?,
                };
            }
            Operation::AddReference {
                node,
                feature,
                target,
                index,
            } => {
                let len = existing(project, *node)?.references(feature).len();
                project.add_reference(*node, feature, *target, Some((*index).min(len)))?;
            }
            Operation::RemoveReference {
                node,
                feature,
                target,
                index,
            } => {
                let refs = existing(project, *node)?.references(feature);
                if refs.get(*index) == Some(target) {
                    project.remove_reference_at(*node, feature, *index)?;
                } else {
                    project.remove_reference(*node, feature, *target)?;
                }
            }
            Operation::SetReferences {
                node,
                feature,
                old,
                new,
            } => {
                if existing(project, *node)?.references(feature) != old.as_slice() {
                    return Err(GraphError::StateMismatch(format!(
                        "references {} of {} changed underneath",
                        feature, node
                    ))
                    .into());
                }
                project.set_references(*node, feature, new.clone())?;
            }
        }
        Ok(())
    }

    /// Human readable operation kind
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateNode { .. } => "create_node",
            Operation::DeleteNode { .. } => "delete_node",
            Operation::MoveNode { .. } => "move_node",
            Operation::SetAttribute { .. } => "set_attribute",
            Operation::AddReference { .. } => "add_reference",
            Operation::RemoveReference { .. } => "remove_reference",
            Operation::SetReferences { .. } => "set_references",
        }
    }
}

/// Apply a batch of operations all-or-nothing
///
/// When one operation fails, the already applied ones are reversed in
/// reverse order and the failure is returned.
pub fn apply_all(project: &mut Project, operations: &[Operation]) -> Result<()> {
    for (position, operation) in operations.iter().enumerate() {
        if let Err(e) = operation.apply(project) {
            rollback(project, &operations[..position]);
            return Err(e);
        }
    }
    Ok(())
}

/// Reverse already applied operations, newest first
pub fn rollback(project: &mut Project, applied: &[Operation]) {
    for operation in applied.iter().rev() {
        if let Err(e) = operation.reverse().apply(project) {
            warn!(op = operation.kind(), error = %e, "Failed to reverse operation");
        }
    }
}

fn existing(project: &Project, id: NodeId) -> Result<&crate::graph::Node> {
    project
        .node(id)
        .ok_or_else(|| GraphError::NodeNotFound { id }.into())
}

fn expect_container(project: &Project, node: NodeId, slot: &ContainmentSlot) -> Result<()> {
    let current = existing(project, node)?.container();
    if current != Some((slot.parent, slot.feature.as_str())) {
        return Err(GraphError::StateMismatch(format!(
            "{} is no longer contained in {}.{}",
            node, slot.parent, slot.feature
        ))
        .into());
    }
    Ok(())
}

fn node_ref(value: Option<&Value>) -> Option<NodeId> {
    match value {
        Some(Value::NodeRef(id)) => Some(*id),
        _ => None,
    }
}

fn node_refs(value: Option<&Value>) -> Vec<NodeId> {
    match value {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|v| node_ref(Some(v)))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::types::ProjectId;

    fn record(project: &mut Project) -> Vec<Operation> {
        let filters = FilterStack::default_stack();
        project
            .take_events()
            .iter()
            .filter_map(|e| Operation::from_event(e, &filters))
            .collect()
    }

    fn edit(p: &mut Project) {
        let root = p.root();
        let a = p.add_node(root, "items", NodeSnapshot::new("Task").attribute("name", "a")).unwrap();
        let b = p.add_node(root, "items", NodeSnapshot::new("Task")).unwrap();
        let c = p.add_node(a, "steps", NodeSnapshot::new("Step")).unwrap();
        p.set_attribute(a, "name", "renamed").unwrap();
        p.set_attribute(a, "name", "renamed").unwrap();
        p.set_transient(a, "hover", true).unwrap();
        p.add_reference(b, "blocks", a, None).unwrap();
        p.add_reference(b, "blocks", c, None).unwrap();
        p.remove_reference(b, "blocks", a).unwrap();
        p.move_node(c, ContainmentSlot::new(b, "steps", 0)).unwrap();
        p.move_node(b, ContainmentSlot::new(root, "items", 0)).unwrap();
        p.set_references(a, "related", vec![b, c]).unwrap();
        p.clear_references(a, "related").unwrap();
        p.unset_attribute(a, "name").unwrap();
        p.remove_node(a).unwrap();
    }

    #[test]
    fn test_replay_reproduces_edits() {
        let id = ProjectId::new();
        let mut source = Project::new(id, "/a/main.vgp");
        edit(&mut source);
        let ops = record(&mut source);
        assert!(ops.iter().all(|op| !matches!(op, Operation::SetAttribute { old, new, .. } if old == new)));

        let mut replica = Project::new(id, "/b/main.vgp");
        apply_all(&mut replica, &ops).unwrap();
        assert_eq!(replica.content_snapshot(), source.content_snapshot());
    }

    #[test]
    fn test_rollback_restores_initial_state() {
        let mut p = Project::new(ProjectId::new(), "/a/main.vgp");
        let before = p.content_snapshot();
        edit(&mut p);
        let ops = record(&mut p);

        rollback(&mut p, &ops);
        assert_eq!(p.content_snapshot(), before);
    }

    #[test]
    fn test_reverse_is_involution() {
        let op = Operation::SetAttribute {
            node: NodeId::new(),
            feature: "x".into(),
            old: None,
            new: Some(Value::Int(1)),
        };
        assert_eq!(op.reverse().reverse(), op);
    }

    #[test]
    fn test_stale_attribute_is_rejected() {
        let mut p = Project::new(ProjectId::new(), "/a/main.vgp");
        let root = p.root();
        p.set_attribute(root, "name", "server").unwrap();
        let op = Operation::SetAttribute {
            node: root,
            feature: "name".into(),
            old: Some(Value::from("local base")),
            new: Some(Value::from("mine")),
        };
        assert!(matches!(op.apply(&mut p), Err(Error::Graph(GraphError::StateMismatch(_)))));
        assert_eq!(p.node(root).unwrap().attribute("name"), Some(&Value::from("server")));
    }

    #[test]
    fn test_apply_all_is_atomic() {
        let mut p = Project::new(ProjectId::new(), "/a/main.vgp");
        let root = p.root();
        let before = p.content_snapshot();
        let ops = vec![
            Operation::CreateNode {
                slot: ContainmentSlot::new(root, "items", 0),
                nodes: vec![NodeSnapshot::new("Task")],
            },
            Operation::SetAttribute {
                node: NodeId::new(),
                feature: "x".into(),
                old: None,
                new: Some(Value::Int(1)),
            },
        ];
        assert!(apply_all(&mut p, &ops).is_err());
        assert_eq!(p.content_snapshot(), before);
    }

    #[test]
    fn test_operations_serialize_with_tag() {
        let op = Operation::MoveNode {
            node: NodeId::new(),
            from: ContainmentSlot::new(NodeId::new(), "a", 0),
            to: ContainmentSlot::new(NodeId::new(), "b", 1),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "move_node");
        assert_eq!(serde_json::from_value::<Operation>(json).unwrap(), op);
    }
}
