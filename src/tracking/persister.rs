//! State persister: buffers dirty units and saves them at command boundaries
//!
//! While a command runs, significant changes only mark their unit dirty. When
//! the outermost command completes (or a change arrives outside any command)
//! the dirty units are drained and written through the serializer, provided
//! autosave is enabled.

use crate::core::config::PersistenceConfig;
use crate::core::error::Result;
use crate::core::types::UnitId;
use crate::graph::{Project, ProjectEvent};
use crate::storage::Serializer;
use crate::system::metrics::Metrics;
use crate::tracking::command::CommandEvent;
use crate::tracking::dirty::DirtyUnitSet;
use crate::tracking::filter::FilterStack;
use crate::tracking::splitter::{Placement, UnitSplitter};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Persister command state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersisterState {
    /// No command running; significant changes are saved right away
    Idle,
    /// At least one command running; saves wait for completion
    CommandRunning,
}

/// Outcome of a flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Units written; fragments before the main unit
    pub saved: Vec<UnitId>,
    /// Total bytes written
    pub bytes: u64,
}

impl FlushReport {
    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

/// Change driven persister for one project
pub struct StatePersister<S: Serializer + Clone> {
    serializer: S,
    dirty: DirtyUnitSet,
    filters: FilterStack,
    splitter: UnitSplitter,
    auto_save: bool,
    command_depth: usize,
    closed: bool,
}

impl<S: Serializer + Clone> StatePersister<S> {
    /// Create a persister with the default filter stack
    pub fn new(serializer: S, config: &PersistenceConfig) -> Self {
        Self {
            serializer,
            dirty: DirtyUnitSet::new(),
            filters: FilterStack::default_stack(),
            splitter: UnitSplitter::from_config(config),
            auto_save: config.auto_save,
            command_depth: 0,
            closed: false,
        }
    }

    /// Replace the filter stack
    pub fn with_filters(mut self, filters: FilterStack) -> Self {
        self.filters = filters;
        self
    }

    /// Filter stack, e.g. to append custom filters
    pub fn filters_mut(&mut self) -> &mut FilterStack {
        &mut self.filters
    }

    /// Serializer used for saves
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Dirty unit set
    pub fn dirty(&self) -> &DirtyUnitSet {
        &self.dirty
    }

    /// Unit splitter
    pub fn splitter(&self) -> &UnitSplitter {
        &self.splitter
    }

    /// Current command state
    pub fn state(&self) -> PersisterState {
        if self.command_depth > 0 {
            PersisterState::CommandRunning
        } else {
            PersisterState::Idle
        }
    }

    /// Whether autosave is enabled
    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    /// Toggle autosave
    pub fn set_auto_save(&mut self, enabled: bool) {
        self.auto_save = enabled;
    }

    /// Whether the project was deleted
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// React to a command lifecycle event
    pub fn on_command(&mut self, project: &Project, event: &CommandEvent) -> Result<FlushReport> {
        if self.closed {
            return Ok(FlushReport::default());
        }
        match event {
            CommandEvent::Started(_) => {
                self.command_depth += 1;
                Ok(FlushReport::default())
            }
            CommandEvent::Completed(_) => {
                self.command_depth = self.command_depth.saturating_sub(1);
                if self.command_depth == 0 {
                    self.flush(project)
                } else {
                    Ok(FlushReport::default())
                }
            }
            CommandEvent::Failed(info, reason) => {
                self.command_depth = self.command_depth.saturating_sub(1);
                debug!(command = %info, reason = %reason, dirty = self.dirty.len(), "Command failed, keeping dirty units");
                Ok(FlushReport::default())
            }
        }
    }

    /// React to a project notification
    ///
    /// The project is mutable because splitting may move the inserted node to
    /// a new unit.
    pub fn notify(&mut self, project: &mut Project, event: &ProjectEvent) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        match event {
            ProjectEvent::Changed(change) => {
                if !self.filters.accepts(change) {
                    return Ok(());
                }
                if let Some(unit) = project.unit_of(change.node) {
                    self.dirty.mark_dirty(unit);
                }
                if self.state() == PersisterState::Idle {
                    self.flush(project)?;
                }
            }
            ProjectEvent::NodeAdded { node, .. } => {
                if !project.contains(*node) {
                    return Ok(());
                }
                let placement = self.splitter.place(project, *node, &self.serializer);
                if let Some(unit) = project.unit_of(*node) {
                    self.dirty.mark_dirty(unit);
                }
                if let Placement::Split { .. } = placement? {
                    // the main unit lists every fragment
                    self.dirty.mark_dirty(project.main_unit());
                }
            }
            ProjectEvent::NodeRemoved { removed, .. } => {
                for entry in removed {
                    let Some(unit) = entry.unit else {
                        continue;
                    };
                    if entry.unit_root {
                        project.remove_unit_content(unit, entry.snapshot.id);
                    }
                    self.dirty.mark_dirty(unit);
                }
            }
            ProjectEvent::NodeMoved { .. } => {}
            ProjectEvent::CollectionDeleted => self.close(),
        }
        Ok(())
    }

    /// Save every dirty unit if autosave is enabled
    pub fn flush(&mut self, project: &Project) -> Result<FlushReport> {
        if !self.auto_save || self.closed {
            return Ok(FlushReport::default());
        }
        self.save_dirty(project)
    }

    /// Save every dirty unit regardless of autosave
    pub fn save(&mut self, project: &Project) -> Result<FlushReport> {
        if self.closed {
            return Ok(FlushReport::default());
        }
        self.save_dirty(project)
    }

    /// Mark every unit of the project dirty
    pub fn mark_all_dirty(&self, project: &Project) {
        for unit in project.units() {
            self.dirty.mark_dirty(unit.id());
        }
    }

    /// Unregister tracking after the project was deleted
    pub fn close(&mut self) {
        self.closed = true;
        self.dirty.collection_deleted();
        self.splitter.reset();
        self.command_depth = 0;
    }

    fn save_dirty(&mut self, project: &Project) -> Result<FlushReport> {
        let drained = self.dirty.drain();
        if drained.is_empty() {
            return Ok(FlushReport::default());
        }

        // fragments first: the main unit lists them in its manifest
        let main = project.main_unit();
        let mut ordered: Vec<UnitId> = project
            .units()
            .map(|u| u.id())
            .filter(|id| *id != main && drained.contains(id))
            .collect();
        if drained.contains(&main) {
            ordered.push(main);
        }
        if ordered.len() != drained.len() {
            debug!(
                dropped = drained.len() - ordered.len(),
                "Ignoring dirty units no longer part of the project"
            );
        }

        let metrics = Metrics::global();
        let mut report = FlushReport::default();
        for (position, unit) in ordered.iter().enumerate() {
            match self.serializer.save(project, *unit) {
                Ok(bytes) => {
                    report.saved.push(*unit);
                    report.bytes += bytes;
                }
                Err(e) => {
                    let unsaved: HashSet<UnitId> = ordered[position..].iter().copied().collect();
                    warn!(unit = %unit, pending = unsaved.len(), error = %e, "Failed to save unit");
                    self.dirty.restore(unsaved);
                    metrics.persistence.flush_failures.inc();
                    metrics.persistence.units_saved.inc_by(report.saved.len() as u64);
                    return Err(e);
                }
            }
        }

        metrics.persistence.flushes.inc();
        metrics.persistence.units_saved.inc_by(report.saved.len() as u64);
        debug!(units = report.saved.len(), bytes = report.bytes, "Flushed dirty units");
        Ok(report)
    }
}

impl<S: Serializer + Clone> std::fmt::Debug for StatePersister<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePersister")
            .field("state", &self.state())
            .field("dirty", &self.dirty.len())
            .field("auto_save", &self.auto_save)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::types::{NodeId, ProjectId};
    use crate::graph::{NodeSnapshot, PersistedUnit};
    use crate::storage::{MemorySerializer, UnitDocument};
    use crate::tracking::command::CommandInfo;
    use dashmap::DashMap;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Serializer whose stored size is 5 bytes per node of the unit
    #[derive(Clone, Default)]
    struct SizedSerializer {
        sizes: Arc<DashMap<String, u64>>,
        fail: Arc<AtomicBool>,
    }

    impl Serializer for SizedSerializer {
        fn save(&self, project: &Project, unit: UnitId) -> Result<u64> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            let document = UnitDocument::build(project, unit)?;
            let size = document.nodes.len() as u64 * 5;
            let uri = project.unit(unit).map(|u| u.uri().to_string()).unwrap_or_default();
            self.sizes.insert(uri, size);
            Ok(size)
        }

        fn load(&self, uri: &str) -> Result<UnitDocument> {
            Err(Error::not_found(uri))
        }

        fn stored_size(&self, unit: &PersistedUnit) -> Option<u64> {
            self.sizes.get(unit.uri()).map(|s| *s)
        }

        fn delete(&self, unit: &PersistedUnit) -> Result<()> {
            self.sizes.remove(unit.uri());
            Ok(())
        }
    }

    fn config(threshold: u64) -> PersistenceConfig {
        PersistenceConfig {
            max_unit_size_on_expand: threshold,
            ..PersistenceConfig::default()
        }
    }

    fn project() -> Project {
        Project::new(ProjectId::new(), "/virtual/p/main.vgp")
    }

    fn dispatch<S: Serializer + Clone>(persister: &mut StatePersister<S>, project: &mut Project) -> Result<()> {
        for event in project.take_events() {
            persister.notify(project, &event)?;
        }
        Ok(())
    }

    fn in_command<S: Serializer + Clone>(
        persister: &mut StatePersister<S>,
        project: &mut Project,
        edit: impl FnOnce(&mut Project),
    ) -> FlushReport {
        let info = CommandInfo::new("test");
        persister.on_command(project, &CommandEvent::Started(info.clone())).unwrap();
        edit(project);
        dispatch(persister, project).unwrap();
        persister.on_command(project, &CommandEvent::Completed(info)).unwrap()
    }

    #[test]
    fn test_command_defers_flush_until_completion() {
        let serializer = MemorySerializer::new();
        let mut p = project();
        let root = p.root();
        let mut persister = StatePersister::new(serializer.clone(), &config(u64::MAX));

        let info = CommandInfo::new("edit");
        persister.on_command(&p, &CommandEvent::Started(info.clone())).unwrap();
        assert_eq!(persister.state(), PersisterState::CommandRunning);
        p.set_attribute(root, "name", "x").unwrap();
        dispatch(&mut persister, &mut p).unwrap();
        assert_eq!(serializer.save_count(), 0);
        assert!(persister.dirty().is_dirty(p.main_unit()));

        let report = persister.on_command(&p, &CommandEvent::Completed(info)).unwrap();
        assert_eq!(report.saved, vec![p.main_unit()]);
        assert_eq!(persister.state(), PersisterState::Idle);
        assert!(persister.dirty().is_empty());
    }

    #[test]
    fn test_change_outside_command_saves_immediately() {
        let serializer = MemorySerializer::new();
        let mut p = project();
        let root = p.root();
        let mut persister = StatePersister::new(serializer.clone(), &config(u64::MAX));

        p.set_attribute(root, "name", "x").unwrap();
        dispatch(&mut persister, &mut p).unwrap();
        assert_eq!(serializer.save_count(), 1);
    }

    #[test]
    fn test_nested_commands_flush_once() {
        let serializer = MemorySerializer::new();
        let mut p = project();
        let root = p.root();
        let mut persister = StatePersister::new(serializer.clone(), &config(u64::MAX));

        let outer = CommandInfo::new("outer");
        let inner = CommandInfo::new("inner");
        persister.on_command(&p, &CommandEvent::Started(outer.clone())).unwrap();
        persister.on_command(&p, &CommandEvent::Started(inner.clone())).unwrap();
        p.set_attribute(root, "a", 1i64).unwrap();
        dispatch(&mut persister, &mut p).unwrap();
        assert!(persister.on_command(&p, &CommandEvent::Completed(inner)).unwrap().is_empty());
        assert_eq!(serializer.save_count(), 0);
        persister.on_command(&p, &CommandEvent::Completed(outer)).unwrap();
        assert_eq!(serializer.save_count(), 1);
    }

    #[test]
    fn test_failed_command_keeps_dirty_units() {
        let serializer = MemorySerializer::new();
        let mut p = project();
        let root = p.root();
        let mut persister = StatePersister::new(serializer.clone(), &config(u64::MAX));

        let info = CommandInfo::new("boom");
        persister.on_command(&p, &CommandEvent::Started(info.clone())).unwrap();
        p.set_attribute(root, "a", 1i64).unwrap();
        dispatch(&mut persister, &mut p).unwrap();
        persister
            .on_command(&p, &CommandEvent::Failed(info, "aborted".into()))
            .unwrap();

        assert_eq!(persister.state(), PersisterState::Idle);
        assert_eq!(serializer.save_count(), 0);
        assert!(persister.dirty().is_dirty(p.main_unit()));
    }

    #[test]
    fn test_touch_never_dirties() {
        let serializer = MemorySerializer::new();
        let mut p = project();
        let root = p.root();
        p.set_attribute(root, "name", "x").unwrap();
        p.take_events();
        let mut persister = StatePersister::new(serializer.clone(), &config(u64::MAX));

        let report = in_command(&mut persister, &mut p, |p| {
            p.set_attribute(root, "name", "x").unwrap();
            p.set_transient(root, "hover", true).unwrap();
            p.clear_references(root, "links").unwrap();
        });
        assert!(report.is_empty());
        assert_eq!(serializer.save_count(), 0);
    }

    #[test]
    fn test_autosave_disabled_keeps_units_dirty() {
        let serializer = MemorySerializer::new();
        let mut p = project();
        let root = p.root();
        let mut persister = StatePersister::new(
            serializer.clone(),
            &PersistenceConfig {
                auto_save: false,
                ..PersistenceConfig::default()
            },
        );

        p.set_attribute(root, "a", 1i64).unwrap();
        dispatch(&mut persister, &mut p).unwrap();
        assert_eq!(serializer.save_count(), 0);
        assert_eq!(persister.save(&p).unwrap().saved, vec![p.main_unit()]);
    }

    #[test]
    fn test_removing_sole_dirty_content_still_drains_unit() {
        let serializer = SizedSerializer::default();
        let mut p = project();
        let root = p.root();
        let a = p.add_node(root, "items", NodeSnapshot::new("A")).unwrap();
        let fragment = p.create_unit("/virtual/p/frag.vgf");
        p.assign_to_unit(a, fragment).unwrap();
        p.take_events();
        let mut persister = StatePersister::new(serializer, &config(u64::MAX));

        let report = in_command(&mut persister, &mut p, |p| {
            p.set_attribute(a, "name", "gone soon").unwrap();
            p.remove_node(a).unwrap();
        });
        assert_eq!(report.saved, vec![fragment, p.main_unit()]);
        assert!(p.unit(fragment).unwrap().contents().is_empty());
    }

    #[test]
    fn test_failed_flush_restores_pending_units() {
        let serializer = SizedSerializer::default();
        let mut p = project();
        let root = p.root();
        let mut persister = StatePersister::new(serializer.clone(), &config(u64::MAX));

        serializer.fail.store(true, Ordering::SeqCst);
        p.set_attribute(root, "a", 1i64).unwrap();
        assert!(dispatch(&mut persister, &mut p).is_err());
        assert!(persister.dirty().is_dirty(p.main_unit()));

        serializer.fail.store(false, Ordering::SeqCst);
        assert_eq!(persister.flush(&p).unwrap().saved, vec![p.main_unit()]);
    }

    #[test]
    fn test_collection_deleted_closes_persister() {
        let serializer = MemorySerializer::new();
        let mut p = project();
        let root = p.root();
        let mut persister = StatePersister::new(serializer.clone(), &config(u64::MAX));

        p.delete();
        dispatch(&mut persister, &mut p).unwrap();
        assert!(persister.is_closed());
        persister.dirty().mark_dirty(p.main_unit());
        assert!(persister.flush(&p).unwrap().is_empty());
        assert!(p.set_attribute(root, "a", 1i64).is_err());
    }

    #[test]
    fn test_five_hundred_inserts_split_twice() {
        let serializer = SizedSerializer::default();
        let mut p = project();
        let root = p.root();
        p.add_node(root, "items", NodeSnapshot::new("Seed")).unwrap();
        p.add_node(root, "items", NodeSnapshot::new("Seed")).unwrap();
        p.take_events();

        let mut persister = StatePersister::new(serializer, &config(1000));
        persister.mark_all_dirty(&p);
        persister.save(&p).unwrap();

        let mut splits = Vec::new();
        for insert in 1..=500 {
            let before = p.units().count();
            in_command(&mut persister, &mut p, |p| {
                p.add_node(root, "items", NodeSnapshot::new("Item")).unwrap();
            });
            if p.units().count() > before {
                splits.push(insert);
            }
        }

        assert_eq!(splits, vec![199, 400]);
        assert_eq!(p.units().count(), 3);
        let fragments: Vec<usize> = p.units().skip(1).map(|u| u.contents().len()).collect();
        assert_eq!(fragments, vec![201, 101]);
    }

    #[derive(Debug, Clone)]
    enum Edit {
        Real(usize),
        Touch(usize),
        Transient(usize),
    }

    fn edit_strategy() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (0..4usize).prop_map(Edit::Real),
            (0..4usize).prop_map(Edit::Touch),
            (0..4usize).prop_map(Edit::Transient),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn prop_flushed_units_match_accepted_changes(batches in prop::collection::vec(prop::collection::vec(edit_strategy(), 0..12), 1..6)) {
            let mut p = project();
            let root = p.root();
            let mut nodes: Vec<NodeId> = Vec::new();
            for i in 0..4 {
                let id = p.add_node(root, "items", NodeSnapshot::new("N").attribute("v", 0i64)).unwrap();
                if i > 0 {
                    let unit = p.create_unit(format!("/virtual/p/frag{}.vgf", i));
                    p.assign_to_unit(id, unit).unwrap();
                }
                nodes.push(id);
            }
            p.take_events();

            let mut persister = StatePersister::new(MemorySerializer::new(), &config(u64::MAX));
            let mut counter = 0i64;
            for batch in batches {
                let mut expected = HashSet::new();
                let report = in_command(&mut persister, &mut p, |p| {
                    for edit in &batch {
                        match edit {
                            Edit::Real(i) => {
                                counter += 1;
                                p.set_attribute(nodes[*i], "v", counter).unwrap();
                                expected.insert(p.unit_of(nodes[*i]).unwrap());
                            }
                            Edit::Touch(i) => {
                                let current = p.node(nodes[*i]).unwrap().attribute("v").cloned().unwrap();
                                p.set_attribute(nodes[*i], "v", current).unwrap();
                            }
                            Edit::Transient(i) => {
                                p.set_transient(nodes[*i], "hover", counter).unwrap();
                            }
                        }
                    }
                });
                let saved: HashSet<UnitId> = report.saved.into_iter().collect();
                prop_assert_eq!(saved, expected);
            }
        }
    }
}
