//! In-memory project graph
//!
//! A project is a containment tree of typed nodes rooted at a fixed project
//! root, plus cross references between arbitrary nodes. Every node is
//! persisted in exactly one unit: the unit of its nearest ancestor-or-self
//! that is a unit root. Mutations append [`ProjectEvent`]s to an internal
//! buffer which the owner drains with [`Project::take_events`] and dispatches
//! to observers.

use crate::core::error::{Error, GraphError, Result};
use crate::core::types::{NodeId, ProjectId, UnitId, Value};
use crate::graph::event::{
    ChangeEvent, ChangeKind, ContainmentSlot, Feature, ProjectEvent, RemovedNode,
};
use crate::graph::node::{Node, NodeSnapshot};
use crate::graph::unit::PersistedUnit;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Class name of the project root node
pub const ROOT_CLASS: &str = "Project";

/// In-memory project graph with unit bookkeeping
#[derive(Debug, Clone)]
pub struct Project {
    id: ProjectId,
    root: NodeId,
    nodes: HashMap<NodeId, Node>,
    units: HashMap<UnitId, PersistedUnit>,
    unit_order: Vec<UnitId>,
    main_unit: UnitId,
    events: Vec<ProjectEvent>,
    deleted: bool,
}

impl Project {
    /// Create an empty project whose root lives in a main unit at `main_uri`
    pub fn new(id: ProjectId, main_uri: impl Into<String>) -> Self {
        let root = NodeId::project_root(id);
        let main_unit = UnitId::new();

        let mut unit = PersistedUnit::new(main_unit, main_uri);
        unit.contents.push(root);

        let mut node = Node::from_snapshot(NodeSnapshot::with_id(root, ROOT_CLASS));
        node.unit_root = Some(main_unit);

        Self {
            id,
            root,
            nodes: HashMap::from([(root, node)]),
            units: HashMap::from([(main_unit, unit)]),
            unit_order: vec![main_unit],
            main_unit,
            events: Vec::new(),
            deleted: false,
        }
    }

    /// Reassemble a project from persisted units and their node snapshots
    ///
    /// `units` must start with the main unit. Unit membership is taken from
    /// each unit's contents list; containers are rebuilt from containment
    /// lists.
    pub fn from_parts(
        id: ProjectId,
        units: Vec<PersistedUnit>,
        snapshots: Vec<NodeSnapshot>,
    ) -> Result<Self> {
        let root = NodeId::project_root(id);
        let main_unit = units
            .first()
            .map(|u| u.id)
            .ok_or_else(|| Error::illegal_state("project has no main unit"))?;

        let mut nodes = HashMap::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let node_id = snapshot.id;
            if nodes.insert(node_id, Node::from_snapshot(snapshot)).is_some() {
                return Err(GraphError::NodeExists { id: node_id }.into());
            }
        }
        if !nodes.contains_key(&root) {
            return Err(GraphError::NodeNotFound { id: root }.into());
        }

        let links: Vec<(NodeId, String, NodeId)> = nodes
            .values()
            .flat_map(|n| {
                n.containments
                    .iter()
                    .flat_map(move |(f, children)| children.iter().map(move |c| (n.id, f.clone(), *c)))
            })
            .collect();
        for (parent, feature, child) in links {
            let node = nodes
                .get_mut(&child)
                .ok_or(GraphError::NodeNotFound { id: child })?;
            if node.container.is_some() {
                return Err(GraphError::StateMismatch(format!(
                    "node {} has more than one container",
                    child
                ))
                .into());
            }
            node.container = Some((parent, feature));
        }

        let mut unit_map = HashMap::with_capacity(units.len());
        let mut unit_order = Vec::with_capacity(units.len());
        for unit in units {
            for content in &unit.contents {
                if let Some(node) = nodes.get_mut(content) {
                    node.unit_root = Some(unit.id);
                }
            }
            unit_order.push(unit.id);
            unit_map.insert(unit.id, unit);
        }

        Ok(Self {
            id,
            root,
            nodes,
            units: unit_map,
            unit_order,
            main_unit,
            events: Vec::new(),
            deleted: false,
        })
    }

    /// Project identifier
    pub fn id(&self) -> ProjectId {
        self.id
    }

    /// Root node of the containment tree
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Unit holding the root and the fragment manifest
    pub fn main_unit(&self) -> UnitId {
        self.main_unit
    }

    /// Whether the project has been deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Look up a node
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Whether a node is part of the project
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A project always holds its root
    pub fn is_empty(&self) -> bool {
        false
    }

    /// All nodes in no particular order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Look up a unit
    pub fn unit(&self, id: UnitId) -> Option<&PersistedUnit> {
        self.units.get(&id)
    }

    /// Units in creation order, main unit first
    pub fn units(&self) -> impl Iterator<Item = &PersistedUnit> {
        self.unit_order.iter().filter_map(|id| self.units.get(id))
    }

    /// Unit a node is persisted in
    pub fn unit_of(&self, node: NodeId) -> Option<UnitId> {
        let mut current = self.nodes.get(&node)?;
        loop {
            if let Some(unit) = current.unit_root.filter(|u| self.units.contains_key(u)) {
                return Some(unit);
            }
            let (parent, _) = current.container.as_ref()?;
            current = self.nodes.get(parent)?;
        }
    }

    /// Identifiers of a subtree in pre-order
    pub fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(current) = self.nodes.get(&id) else {
                continue;
            };
            order.push(id);
            let children: Vec<NodeId> = current.all_children().collect();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Snapshots of a subtree in pre-order
    pub fn subtree_snapshot(&self, node: NodeId) -> Vec<NodeSnapshot> {
        self.subtree(node)
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).map(Node::snapshot))
            .collect()
    }

    /// Persisted state of every node, keyed for structural comparison
    pub fn content_snapshot(&self) -> BTreeMap<NodeId, NodeSnapshot> {
        self.nodes.values().map(|n| (n.id, n.snapshot())).collect()
    }

    /// Drain buffered notifications in emission order
    pub fn take_events(&mut self) -> Vec<ProjectEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether notifications are waiting to be drained
    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Position of a node inside its container
    pub fn slot_of(&self, node: NodeId) -> Result<ContainmentSlot> {
        let current = self.get(node)?;
        let (parent, feature) = current
            .container
            .as_ref()
            .ok_or(GraphError::RootImmutable(node))?;
        let index = self
            .get(*parent)?
            .children(feature)
            .iter()
            .position(|c| *c == node)
            .ok_or_else(|| {
                GraphError::StateMismatch(format!("{} missing from its container list", node))
            })?;
        Ok(ContainmentSlot::new(*parent, feature.clone(), index))
    }

    /// Append a single new node to a containment list of `parent`
    pub fn add_node(
        &mut self,
        parent: NodeId,
        feature: &str,
        node: NodeSnapshot,
    ) -> Result<NodeId> {
        let index = self.get(parent)?.children(feature).len();
        self.insert_subtree(ContainmentSlot::new(parent, feature, index), vec![node])
    }

    /// Insert a subtree given in pre-order (first snapshot is its root)
    pub fn insert_subtree(
        &mut self,
        slot: ContainmentSlot,
        nodes: Vec<NodeSnapshot>,
    ) -> Result<NodeId> {
        self.ensure_live()?;
        let subtree_root = nodes
            .first()
            .map(|n| n.id)
            .ok_or_else(|| GraphError::StateMismatch("empty subtree".to_string()))?;

        let len = self.get(slot.parent)?.children(&slot.feature).len();
        if slot.index > len {
            return Err(GraphError::IndexOutOfBounds {
                feature: slot.feature.clone(),
                index: slot.index,
                len,
            }
            .into());
        }
        validate_subtree(&nodes)?;
        if let Some(existing) = nodes.iter().find(|n| self.nodes.contains_key(&n.id)) {
            return Err(GraphError::NodeExists { id: existing.id }.into());
        }

        let mut links = Vec::new();
        for snapshot in &nodes {
            for (feature, children) in &snapshot.containments {
                links.extend(children.iter().map(|c| (*c, snapshot.id, feature.clone())));
            }
        }
        for snapshot in nodes.iter().cloned() {
            self.nodes.insert(snapshot.id, Node::from_snapshot(snapshot));
        }
        for (child, parent, feature) in links {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.container = Some((parent, feature));
            }
        }
        if let Some(node) = self.nodes.get_mut(&subtree_root) {
            node.container = Some((slot.parent, slot.feature.clone()));
        }
        self.get_mut(slot.parent)?
            .containments
            .entry(slot.feature.clone())
            .or_default()
            .insert(slot.index, subtree_root);

        let (parent, feature, index) = (slot.parent, slot.feature.clone(), slot.index);
        self.events.push(ProjectEvent::NodeAdded {
            node: subtree_root,
            slot,
            snapshot: nodes,
        });
        self.changed(
            parent,
            Feature::containment(feature),
            ChangeKind::Add,
            None,
            Some(Value::NodeRef(subtree_root)),
            Some(index),
        );
        Ok(subtree_root)
    }

    /// Detach and drop a subtree, returning its former slot and snapshots
    ///
    /// References from other nodes into the removed subtree are left dangling.
    pub fn remove_node(&mut self, node: NodeId) -> Result<(ContainmentSlot, Vec<NodeSnapshot>)> {
        self.ensure_live()?;
        if node == self.root {
            return Err(GraphError::RootImmutable(node).into());
        }
        let slot = self.slot_of(node)?;

        let removed: Vec<RemovedNode> = self
            .subtree(node)
            .into_iter()
            .filter_map(|id| {
                let n = self.nodes.get(&id)?;
                Some(RemovedNode {
                    snapshot: n.snapshot(),
                    unit: self.unit_of(id),
                    unit_root: n.unit_root.is_some(),
                })
            })
            .collect();

        self.detach_child(slot.parent, &slot.feature, slot.index)?;
        for entry in &removed {
            self.nodes.remove(&entry.snapshot.id);
        }

        let snapshots = removed.iter().map(|r| r.snapshot.clone()).collect();
        self.events.push(ProjectEvent::NodeRemoved {
            node,
            slot: slot.clone(),
            removed,
        });
        self.changed(
            slot.parent,
            Feature::containment(slot.feature.clone()),
            ChangeKind::Remove,
            Some(Value::NodeRef(node)),
            None,
            Some(slot.index),
        );
        Ok((slot, snapshots))
    }

    /// Move a node to another containment slot
    ///
    /// For a move inside the same list, `to.index` is the final position.
    pub fn move_node(&mut self, node: NodeId, to: ContainmentSlot) -> Result<()> {
        self.ensure_live()?;
        if node == self.root {
            return Err(GraphError::RootImmutable(node).into());
        }
        self.get(to.parent)?;
        if self.subtree(node).contains(&to.parent) {
            return Err(GraphError::CycleDetected {
                node,
                parent: to.parent,
            }
            .into());
        }

        let from = self.slot_of(node)?;
        let same_list = from.parent == to.parent && from.feature == to.feature;
        if same_list && from.index == to.index {
            return Ok(());
        }

        let target_len = self.get(to.parent)?.children(&to.feature).len();
        let max_index = if same_list { target_len - 1 } else { target_len };
        if to.index > max_index {
            return Err(GraphError::IndexOutOfBounds {
                feature: to.feature.clone(),
                index: to.index,
                len: max_index,
            }
            .into());
        }

        self.detach_child(from.parent, &from.feature, from.index)?;
        self.get_mut(to.parent)?
            .containments
            .entry(to.feature.clone())
            .or_default()
            .insert(to.index, node);
        self.get_mut(node)?.container = Some((to.parent, to.feature.clone()));

        self.events.push(ProjectEvent::NodeMoved {
            node,
            from: from.clone(),
            to: to.clone(),
        });
        if same_list {
            self.changed(
                to.parent,
                Feature::containment(to.feature.clone()),
                ChangeKind::Move,
                Some(Value::Int(from.index as i64)),
                Some(Value::NodeRef(node)),
                Some(to.index),
            );
        } else {
            self.changed(
                from.parent,
                Feature::containment(from.feature.clone()),
                ChangeKind::Remove,
                Some(Value::NodeRef(node)),
                None,
                Some(from.index),
            );
            self.changed(
                to.parent,
                Feature::containment(to.feature.clone()),
                ChangeKind::Add,
                None,
                Some(Value::NodeRef(node)),
                Some(to.index),
            );
        }
        Ok(())
    }

    /// Set a persisted attribute, returning the previous value
    ///
    /// Setting an attribute to its current value still emits a (touch) event.
    pub fn set_attribute(
        &mut self,
        node: NodeId,
        feature: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        self.ensure_live()?;
        let value = value.into();
        let old = self
            .get_mut(node)?
            .attributes
            .insert(feature.to_string(), value.clone());
        self.changed(
            node,
            Feature::attribute(feature),
            ChangeKind::Set,
            old.clone(),
            Some(value),
            None,
        );
        Ok(old)
    }

    /// Clear a persisted attribute, returning the previous value
    pub fn unset_attribute(&mut self, node: NodeId, feature: &str) -> Result<Option<Value>> {
        self.ensure_live()?;
        let old = self.get_mut(node)?.attributes.remove(feature);
        self.changed(
            node,
            Feature::attribute(feature),
            ChangeKind::Unset,
            old.clone(),
            None,
            None,
        );
        Ok(old)
    }

    /// Set a transient attribute; transient values are never persisted
    pub fn set_transient(
        &mut self,
        node: NodeId,
        feature: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        self.ensure_live()?;
        let value = value.into();
        let old = self
            .get_mut(node)?
            .transient
            .insert(feature.to_string(), value.clone());
        self.changed(
            node,
            Feature::attribute(feature).transient(),
            ChangeKind::Set,
            old.clone(),
            Some(value),
            None,
        );
        Ok(old)
    }

    /// Insert a reference target, appending when `index` is `None`
    pub fn add_reference(
        &mut self,
        node: NodeId,
        feature: &str,
        target: NodeId,
        index: Option<usize>,
    ) -> Result<usize> {
        self.ensure_live()?;
        let len = self.get(node)?.references(feature).len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(GraphError::IndexOutOfBounds {
                feature: feature.to_string(),
                index,
                len,
            }
            .into());
        }
        self.get_mut(node)?
            .references
            .entry(feature.to_string())
            .or_default()
            .insert(index, target);
        self.changed(
            node,
            Feature::reference(feature),
            ChangeKind::Add,
            None,
            Some(Value::NodeRef(target)),
            Some(index),
        );
        Ok(index)
    }

    /// Remove the reference at `index`, returning its target
    pub fn remove_reference_at(
        &mut self,
        node: NodeId,
        feature: &str,
        index: usize,
    ) -> Result<NodeId> {
        self.ensure_live()?;
        let current = self.get_mut(node)?;
        let len = current.references(feature).len();
        let list = current
            .references
            .get_mut(feature)
            .filter(|_| index < len)
            .ok_or_else(|| GraphError::IndexOutOfBounds {
                feature: feature.to_string(),
                index,
                len,
            })?;
        let target = list.remove(index);
        if list.is_empty() {
            current.references.remove(feature);
        }
        self.changed(
            node,
            Feature::reference(feature),
            ChangeKind::Remove,
            Some(Value::NodeRef(target)),
            None,
            Some(index),
        );
        Ok(target)
    }

    /// Remove the first reference to `target`
    pub fn remove_reference(&mut self, node: NodeId, feature: &str, target: NodeId) -> Result<usize> {
        let index = self
            .get(node)?
            .references(feature)
            .iter()
            .position(|t| *t == target)
            .ok_or_else(|| GraphError::ReferenceNotFound {
                node,
                feature: feature.to_string(),
                target,
            })?;
        self.remove_reference_at(node, feature, index)?;
        Ok(index)
    }

    /// Remove every target of a reference list
    ///
    /// Clearing an already empty list still emits a remove-many event.
    pub fn clear_references(&mut self, node: NodeId, feature: &str) -> Result<Vec<NodeId>> {
        self.ensure_live()?;
        let old = self
            .get_mut(node)?
            .references
            .remove(feature)
            .unwrap_or_default();
        self.changed(
            node,
            Feature::reference(feature),
            ChangeKind::RemoveMany,
            Some(refs_value(&old)),
            None,
            None,
        );
        Ok(old)
    }

    /// Replace a whole reference list, returning the previous targets
    pub fn set_references(
        &mut self,
        node: NodeId,
        feature: &str,
        targets: Vec<NodeId>,
    ) -> Result<Vec<NodeId>> {
        self.ensure_live()?;
        let current = self.get_mut(node)?;
        let old = if targets.is_empty() {
            current.references.remove(feature)
        } else {
            current.references.insert(feature.to_string(), targets.clone())
        }
        .unwrap_or_default();
        self.changed(
            node,
            Feature::reference(feature),
            ChangeKind::Set,
            Some(refs_value(&old)),
            Some(refs_value(&targets)),
            None,
        );
        Ok(old)
    }

    /// Mark the project deleted; further mutations fail
    pub fn delete(&mut self) {
        if !self.deleted {
            self.deleted = true;
            self.events.push(ProjectEvent::CollectionDeleted);
        }
    }

    /// Register a new unit at `uri`; emits no notification
    pub(crate) fn create_unit(&mut self, uri: impl Into<String>) -> UnitId {
        let id = UnitId::new();
        self.units.insert(id, PersistedUnit::new(id, uri));
        self.unit_order.push(id);
        id
    }

    /// Make `node` a direct content of `unit`
    pub(crate) fn assign_to_unit(&mut self, node: NodeId, unit: UnitId) -> Result<()> {
        if !self.units.contains_key(&unit) {
            return Err(GraphError::UnitNotFound { id: unit }.into());
        }
        let previous = self.get_mut(node)?.unit_root.replace(unit);
        if let Some(previous) = previous.filter(|p| *p != unit) {
            if let Some(old) = self.units.get_mut(&previous) {
                old.contents.retain(|c| *c != node);
            }
        }
        if let Some(target) = self.units.get_mut(&unit) {
            if !target.contents.contains(&node) {
                target.contents.push(node);
            }
        }
        Ok(())
    }

    /// Drop a removed node from the contents of `unit`
    pub(crate) fn remove_unit_content(&mut self, unit: UnitId, node: NodeId) -> bool {
        match self.units.get_mut(&unit) {
            Some(u) => {
                let before = u.contents.len();
                u.contents.retain(|c| *c != node);
                before != u.contents.len()
            }
            None => false,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.deleted {
            return Err(Error::Deleted(self.id));
        }
        Ok(())
    }

    fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GraphError::NodeNotFound { id }.into())
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::NodeNotFound { id }.into())
    }

    /// Remove a child id from a containment list, dropping the list once empty
    fn detach_child(&mut self, parent: NodeId, feature: &str, index: usize) -> Result<()> {
        let containments = &mut self.get_mut(parent)?.containments;
        if let Some(list) = containments.get_mut(feature) {
            list.remove(index);
            if list.is_empty() {
                containments.remove(feature);
            }
        }
        Ok(())
    }

    fn changed(
        &mut self,
        node: NodeId,
        feature: Feature,
        kind: ChangeKind,
        old: Option<Value>,
        new: Option<Value>,
        index: Option<usize>,
    ) {
        self.events.push(ProjectEvent::Changed(ChangeEvent {
            node,
            feature,
            kind,
            old,
            new,
            index,
        }));
    }
}

fn refs_value(targets: &[NodeId]) -> Value {
    Value::List(targets.iter().copied().map(Value::NodeRef).collect())
}

/// A subtree in pre-order must reach every snapshot exactly once from the first
fn validate_subtree(nodes: &[NodeSnapshot]) -> Result<()> {
    let by_id: HashMap<NodeId, &NodeSnapshot> = nodes.iter().map(|n| (n.id, n)).collect();
    if by_id.len() != nodes.len() {
        return Err(GraphError::StateMismatch("duplicate node in subtree".to_string()).into());
    }

    let mut seen = HashSet::with_capacity(nodes.len());
    let mut stack = vec![nodes[0].id];
    while let Some(id) = stack.pop() {
        let snapshot = by_id.get(&id).ok_or_else(|| {
            GraphError::StateMismatch(format!("child {} missing from subtree", id))
        })?;
        if !seen.insert(id) {
            return Err(GraphError::StateMismatch(format!("{} contained twice", id)).into());
        }
        stack.extend(snapshot.child_ids());
    }
    if seen.len() != nodes.len() {
        return Err(GraphError::StateMismatch("subtree has detached nodes".to_string()).into());
    }
    Ok(())
}
