//! Versioned project space: a local project checked out from (or shared to)
//! the server, with its pending operation log
//!
//! Local mutations go through [`ProjectSpace::edit`] or
//! [`ProjectSpace::execute`]. Every notification they produce is dispatched,
//! in this order, to the operation recorder, the state persister and the
//! subscribed observers (highest priority first).
//!
//! Commit and update talk to the server without holding the state lock and
//! only touch local state once the server answered. A per-space activity flag
//! rejects a commit while another commit or an update is in flight (and vice
//! versa) instead of queueing it.

use crate::core::config::{Config, Durability, NetworkConfig};
use crate::core::error::{Error, NetworkError, Result, SerializationError};
use crate::core::types::ProjectId;
use crate::graph::{ObserverHandle, ObserverList, Project, ProjectObserver};
use crate::storage::file::write_atomic;
use crate::storage::{load_project, Serializer};
use crate::system::metrics::{Metrics, Timer};
use crate::tracking::{CommandEvent, CommandInfo, FilterStack, FlushReport, StatePersister};
use crate::versioning::operation::{apply_all, rollback, Operation};
use crate::versioning::retry::with_retry;
use crate::versioning::server::ServerChannel;
use crate::versioning::version::{
    CommitRequest, CreateProject, LogMessage, ProjectInfo, VersionDelta, VersionMarker, VersionSpec,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable state of a project space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceStatus {
    /// No pending local operations
    Clean,
    /// Local operations waiting to be committed
    Dirty,
    /// A commit is in flight
    Committing,
    /// An update is in flight
    Updating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Activity {
    Idle = 0,
    Committing = 1,
    Updating = 2,
}

/// Clears the activity flag when the commit/update ends or is cancelled
struct ActivityGuard<'a> {
    flag: &'a AtomicU8,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(Activity::Idle as u8, Ordering::Release);
    }
}

/// Persisted project space metadata (`space.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMetadata {
    /// Project identifier
    pub project_id: ProjectId,
    /// Server project info, `None` until shared
    pub info: Option<ProjectInfo>,
    /// Version the local state is based on
    pub base_version: VersionMarker,
    /// URI of the main unit
    pub main_uri: String,
    /// Pending local operations
    #[serde(default)]
    pub operations: Vec<Operation>,
}

struct SpaceState<S: Serializer + Clone> {
    project: Project,
    persister: StatePersister<S>,
    recorder_filters: FilterStack,
    operations: Vec<Operation>,
    recording: bool,
    base_version: VersionMarker,
    info: Option<ProjectInfo>,
    observers: ObserverList,
    deleted: bool,
}

impl<S: Serializer + Clone> SpaceState<S> {
    fn ensure_live(&self) -> Result<()> {
        if self.deleted {
            return Err(Error::Deleted(self.project.id()));
        }
        Ok(())
    }

    /// Deliver buffered notifications: recorder, persister, observers
    fn dispatch(&mut self) -> Result<()> {
        let mut first_error = None;
        for event in self.project.take_events() {
            if self.recording {
                if let Some(op) = Operation::from_event(&event, &self.recorder_filters) {
                    self.operations.push(op);
                }
            }
            if let Err(e) = self.persister.notify(&mut self.project, &event) {
                first_error.get_or_insert(e);
            }
            self.observers.dispatch(&self.project, &event);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn command(&mut self, event: CommandEvent) -> Result<FlushReport> {
        self.persister.on_command(&self.project, &event)
    }

    fn metadata(&self) -> SpaceMetadata {
        SpaceMetadata {
            project_id: self.project.id(),
            info: self.info.clone(),
            base_version: self.base_version,
            main_uri: self
                .project
                .unit(self.project.main_unit())
                .map(|u| u.uri().to_string())
                .unwrap_or_default(),
            operations: self.operations.clone(),
        }
    }
}

/// Local working copy of a versioned project
pub struct ProjectSpace<S: Serializer + Clone> {
    project_id: ProjectId,
    state: Mutex<SpaceState<S>>,
    activity: AtomicU8,
    network: NetworkConfig,
    durability: Durability,
    metadata_path: Option<PathBuf>,
}

impl<S: Serializer + Clone> ProjectSpace<S> {
    /// Create a local (not yet shared) project space
    pub fn new(project: Project, serializer: S, config: &Config) -> Self {
        let base = VersionMarker::initial(project.id());
        Self::from_parts(project, serializer, config, None, base, Vec::new())
    }

    fn from_parts(
        project: Project,
        serializer: S,
        config: &Config,
        info: Option<ProjectInfo>,
        base_version: VersionMarker,
        operations: Vec<Operation>,
    ) -> Self {
        let project_id = project.id();
        Self {
            project_id,
            state: Mutex::new(SpaceState {
                project,
                persister: StatePersister::new(serializer, &config.persistence),
                recorder_filters: FilterStack::default_stack(),
                operations,
                recording: true,
                base_version,
                info,
                observers: ObserverList::new(),
                deleted: false,
            }),
            activity: AtomicU8::new(Activity::Idle as u8),
            network: config.network.clone(),
            durability: config.persistence.durability,
            metadata_path: None,
        }
    }

    /// Persist space metadata to `path` after every change
    pub fn with_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_path = Some(path.into());
        self
    }

    /// Restore a space from its metadata file and unit files
    pub fn open(metadata_path: &Path, serializer: S, config: &Config) -> Result<Self> {
        let bytes = std::fs::read(metadata_path).map_err(|source| SerializationError::Io {
            path: metadata_path.to_path_buf(),
            source,
        })?;
        let metadata: SpaceMetadata =
            serde_json::from_slice(&bytes).map_err(SerializationError::from)?;
        let project = load_project(&serializer, metadata.project_id, &metadata.main_uri)?;

        info!(
            project = %metadata.project_id,
            version = metadata.base_version.number,
            pending = metadata.operations.len(),
            "Opened project space"
        );
        Ok(Self::from_parts(
            project,
            serializer,
            config,
            metadata.info,
            metadata.base_version,
            metadata.operations,
        )
        .with_metadata(metadata_path))
    }

    /// Check out a project from the server at its head version
    pub async fn checkout<C: ServerChannel>(
        server: &C,
        project_id: ProjectId,
        main_uri: impl Into<String>,
        serializer: S,
        config: &Config,
    ) -> Result<Self> {
        let info = with_retry(&config.network, "project_info", move || server.project_info(project_id))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::checkout(format!("project {} does not exist on the server", project_id))
                }
                other => other,
            })?;
        let head = info.version.number;
        let deltas = with_retry(&config.network, "fetch_deltas", move || {
            server.fetch_deltas(project_id, 0, VersionSpec::Primary(head))
        })
        .await?;
        check_contiguous(0, &deltas)?;

        let mut project = Project::new(project_id, main_uri);
        for delta in &deltas {
            apply_all(&mut project, &delta.operations).map_err(|e| {
                Error::checkout(format!("version {} does not apply: {}", delta.version.number, e))
            })?;
        }
        project.take_events();

        let base = deltas
            .last()
            .map(|d| d.version)
            .unwrap_or_else(|| VersionMarker::initial(project_id));
        let space = Self::from_parts(project, serializer, config, Some(info), base, Vec::new());
        space.save_all()?;
        info!(project = %project_id, version = base.number, "Checked out project");
        Ok(space)
    }

    /// Project identifier
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Server project info, `None` while the space is local only
    pub fn info(&self) -> Option<ProjectInfo> {
        self.state.lock().info.clone()
    }

    /// Whether the project exists on a server
    pub fn is_shared(&self) -> bool {
        self.state.lock().info.is_some()
    }

    /// Version the local state is based on
    pub fn base_version(&self) -> VersionMarker {
        self.state.lock().base_version
    }

    /// Pending local operations
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().operations.clone()
    }

    /// Number of pending local operations
    pub fn operation_count(&self) -> usize {
        self.state.lock().operations.len()
    }

    /// Whether the space has been deleted
    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }

    /// Current status
    pub fn status(&self) -> SpaceStatus {
        match self.activity.load(Ordering::Acquire) {
            a if a == Activity::Committing as u8 => SpaceStatus::Committing,
            a if a == Activity::Updating as u8 => SpaceStatus::Updating,
            _ if self.state.lock().operations.is_empty() => SpaceStatus::Clean,
            _ => SpaceStatus::Dirty,
        }
    }

    /// Path of the metadata file, if any
    pub fn metadata_path(&self) -> Option<&Path> {
        self.metadata_path.as_deref()
    }

    /// Serializer used by this space
    pub fn serializer(&self) -> S {
        self.state.lock().persister.serializer().clone()
    }

    /// Run a read-only closure against the project
    pub fn read<R>(&self, f: impl FnOnce(&Project) -> R) -> R {
        f(&self.state.lock().project)
    }

    /// Mutate the project outside of a command
    ///
    /// Each significant change is flushed as soon as it is seen.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Project) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        state.ensure_live()?;
        let result = f(&mut state.project);
        let dispatched = state.dispatch();
        self.persist_metadata(&state)?;
        let value = result?;
        dispatched?;
        Ok(value)
    }

    /// Mutate the project as one command; dirty units are flushed once at the end
    pub fn execute<R>(
        &self,
        label: &str,
        f: impl FnOnce(&mut Project) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        state.ensure_live()?;
        let command = CommandInfo::new(label);
        state.command(CommandEvent::Started(command.clone()))?;

        let result = f(&mut state.project);
        let dispatched = state.dispatch();
        let finished = match (&result, &dispatched) {
            (Ok(_), Ok(())) => state.command(CommandEvent::Completed(command)).map(|_| ()),
            (Err(e), _) | (_, Err(e)) => {
                let reason = e.to_string();
                state.command(CommandEvent::Failed(command, reason)).map(|_| ())
            }
        };
        self.persist_metadata(&state)?;

        let value = result?;
        dispatched?;
        finished?;
        Ok(value)
    }

    /// Save every dirty unit now, regardless of autosave
    pub fn save(&self) -> Result<FlushReport> {
        let mut state = self.state.lock();
        state.ensure_live()?;
        let state = &mut *state;
        let report = state.persister.save(&state.project)?;
        self.persist_metadata(state)?;
        Ok(report)
    }

    /// Write every unit of the project, dirty or not
    pub fn save_all(&self) -> Result<FlushReport> {
        let mut state = self.state.lock();
        state.ensure_live()?;
        let state = &mut *state;
        state.persister.mark_all_dirty(&state.project);
        let report = state.persister.save(&state.project)?;
        self.persist_metadata(state)?;
        Ok(report)
    }

    /// Register an observer; higher priorities run first, after the
    /// recorder and the persister
    pub fn subscribe(&self, priority: i32, observer: impl ProjectObserver + 'static) -> ObserverHandle {
        self.state.lock().observers.subscribe(priority, Box::new(observer))
    }

    /// Remove an observer
    pub fn unsubscribe(&self, handle: ObserverHandle) -> bool {
        self.state.lock().observers.unsubscribe(handle)
    }

    /// Create the project on the server and commit pending local work as its
    /// first version
    pub async fn share<C: ServerChannel>(
        &self,
        server: &C,
        name: &str,
        description: &str,
        author: &str,
    ) -> Result<VersionMarker> {
        {
            let _guard = self.begin(Activity::Committing)?;
            {
                let state = self.state.lock();
                state.ensure_live()?;
                if state.info.is_some() {
                    return Err(Error::illegal_state(format!(
                        "project {} is already shared",
                        self.project_id
                    )));
                }
            }

            let request = CreateProject {
                project_id: self.project_id,
                name: name.to_string(),
                description: description.to_string(),
            };
            let info = with_retry(&self.network, "create_project", move || {
                server.create_project(request.clone())
            })
            .await?;

            let mut state = self.state.lock();
            state.base_version = info.version;
            state.info = Some(info);
            self.persist_metadata(&state)?;
            info!(project = %self.project_id, name = name, "Shared project");
        }

        if self.operation_count() == 0 {
            return Ok(self.base_version());
        }
        self.commit(server, LogMessage::new(author, "Initial commit")).await
    }

    /// Send pending local operations to the server as a new version
    pub async fn commit<C: ServerChannel>(
        &self,
        server: &C,
        log_message: LogMessage,
    ) -> Result<VersionMarker> {
        let _guard = self.begin(Activity::Committing)?;
        let metrics = Metrics::global();
        let (base, operations) = {
            let state = self.state.lock();
            state.ensure_live()?;
            if state.info.is_none() {
                return Err(Error::illegal_state(format!(
                    "project {} is not shared",
                    self.project_id
                )));
            }
            if state.operations.is_empty() {
                return Err(Error::NoLocalChanges);
            }
            (state.base_version, state.operations.clone())
        };
        let timer = Timer::start(metrics.versioning.round_trip_duration.clone());
        let project_id = self.project_id;

        let head = with_retry(&self.network, "project_info", move || server.project_info(project_id))
            .await?
            .version;
        if head.number > base.number {
            metrics.versioning.conflicts.inc();
            warn!(project = %project_id, base = base.number, head = head.number, "Commit rejected, update required");
            return Err(Error::Conflict {
                base: base.number,
                head: head.number,
            });
        }

        let committed = operations.len();
        let request = CommitRequest {
            project: project_id,
            base_version: base.number,
            operations,
            log_message,
            request_token: Uuid::new_v4(),
        };
        let marker = with_retry(&self.network, "commit", move || server.commit(request.clone()))
            .await
            .inspect_err(|e| {
                if e.is_conflict() {
                    metrics.versioning.conflicts.inc();
                }
            })?;

        {
            let mut state = self.state.lock();
            let drained = committed.min(state.operations.len());
            state.operations.drain(..drained);
            state.base_version = marker;
            if let Some(info) = state.info.as_mut() {
                info.version = marker;
            }
            self.persist_metadata(&state)?;
        }

        metrics.versioning.commits.inc();
        timer.finish();
        info!(project = %project_id, version = marker.number, operations = committed, "Committed");
        Ok(marker)
    }

    /// Bring the local state to `target`, keeping local work on top
    ///
    /// Returns the number of server versions applied. A delta that does not
    /// apply stops the batch; versions applied before it are kept and the
    /// error is returned after local operations have been replayed.
    pub async fn update<C: ServerChannel>(&self, server: &C, target: VersionSpec) -> Result<usize> {
        let _guard = self.begin(Activity::Updating)?;
        let metrics = Metrics::global();
        let base = {
            let state = self.state.lock();
            state.ensure_live()?;
            if state.info.is_none() {
                return Err(Error::illegal_state(format!(
                    "project {} is not shared",
                    self.project_id
                )));
            }
            state.base_version
        };
        let timer = Timer::start(metrics.versioning.round_trip_duration.clone());
        let project_id = self.project_id;

        let deltas = with_retry(&self.network, "fetch_deltas", move || {
            server.fetch_deltas(project_id, base.number, target)
        })
        .await?;
        check_contiguous(base.number, &deltas)?;
        if deltas.is_empty() {
            debug!(project = %project_id, version = base.number, "Already up to date");
            return Ok(0);
        }

        let mut state = self.state.lock();
        let outcome = self.apply_deltas(&mut state, deltas);
        self.persist_metadata(&state)?;
        drop(state);

        let applied = outcome?;
        metrics.versioning.updates.inc();
        timer.finish();
        info!(project = %project_id, from = base.number, applied, "Updated");
        Ok(applied)
    }

    /// Delete the space: drop unit artifacts and stop tracking
    pub fn delete(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.deleted {
            return Ok(());
        }
        state.project.delete();
        state.dispatch()?;
        state.deleted = true;
        state.operations.clear();
        state.observers.clear();

        let serializer = state.persister.serializer().clone();
        for unit in state.project.units() {
            serializer.delete(unit)?;
        }
        if let Some(path) = &self.metadata_path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(SerializationError::Io {
                        path: path.clone(),
                        source,
                    }
                    .into())
                }
            }
        }
        info!(project = %self.project_id, "Deleted project space");
        Ok(())
    }

    /// Roll local work back, apply server deltas, replay local work
    fn apply_deltas(&self, state: &mut SpaceState<S>, deltas: Vec<VersionDelta>) -> Result<usize> {
        let metrics = Metrics::global();
        let command = CommandInfo::new("update");
        state.command(CommandEvent::Started(command.clone()))?;
        state.recording = false;

        let local = std::mem::take(&mut state.operations);
        rollback(&mut state.project, &local);
        let mut persist_error = state.dispatch().err();

        let mut applied = 0;
        let mut failure = None;
        for delta in deltas {
            match apply_all(&mut state.project, &delta.operations) {
                Ok(()) => {
                    state.base_version = delta.version;
                    applied += 1;
                    metrics.versioning.deltas_applied.inc();
                }
                Err(e) => {
                    warn!(version = delta.version.number, error = %e, "Server version does not apply, stopping update");
                    failure = Some(e);
                }
            }
            if let Err(e) = state.dispatch() {
                persist_error.get_or_insert(e);
            }
            if failure.is_some() {
                break;
            }
        }
        if let Some(info) = state.info.as_mut() {
            info.version = state.base_version;
        }

        let mut kept = Vec::with_capacity(local.len());
        for op in local {
            match op.apply(&mut state.project) {
                Ok(()) => kept.push(op),
                Err(e) => {
                    metrics.versioning.local_operations_dropped.inc();
                    warn!(op = op.kind(), error = %e, "Dropping local operation that no longer applies");
                }
            }
        }
        if let Err(e) = state.dispatch() {
            persist_error.get_or_insert(e);
        }
        state.operations = kept;
        state.recording = true;

        let flushed = state.command(CommandEvent::Completed(command));
        if let Some(e) = failure {
            return Err(e);
        }
        if let Some(e) = persist_error {
            return Err(e);
        }
        flushed?;
        Ok(applied)
    }

    fn begin(&self, activity: Activity) -> Result<ActivityGuard<'_>> {
        match self.activity.compare_exchange(
            Activity::Idle as u8,
            activity as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(ActivityGuard {
                flag: &self.activity,
            }),
            Err(current) if current == Activity::Committing as u8 => {
                Err(Error::CommitInProgress(self.project_id))
            }
            Err(_) => Err(Error::UpdateInProgress(self.project_id)),
        }
    }

    fn persist_metadata(&self, state: &SpaceState<S>) -> Result<()> {
        let Some(path) = &self.metadata_path else {
            return Ok(());
        };
        if state.deleted {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&state.metadata()).map_err(SerializationError::from)?;
        write_atomic(path, &bytes, self.durability)?;
        Ok(())
    }
}

impl<S: Serializer + Clone> std::fmt::Debug for ProjectSpace<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectSpace")
            .field("project_id", &self.project_id)
            .field("status", &self.status())
            .finish()
    }
}

/// Deltas must continue the local version without gaps
fn check_contiguous(base: u64, deltas: &[VersionDelta]) -> Result<()> {
    let mut expected = base + 1;
    for delta in deltas {
        if delta.version.number != expected || delta.base != expected - 1 {
            return Err(NetworkError::Protocol(format!(
                "expected version {}, server sent {} (based on {})",
                expected, delta.version.number, delta.base
            ))
            .into());
        }
        expected += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{NodeId, UnitId, Value};
    use crate::graph::{NodeSnapshot, PersistedUnit, ProjectEvent};
    use crate::storage::{MemorySerializer, UnitDocument};
    use crate::versioning::memory_server::InMemoryServer;
    use std::sync::Arc;
    use std::time::Duration;

    /// Memory serializer whose fragment writes fail
    #[derive(Clone, Default)]
    struct FragmentsFail {
        inner: MemorySerializer,
    }

    impl Serializer for FragmentsFail {
        fn save(&self, project: &Project, unit: UnitId) -> Result<u64> {
            let is_fragment = project
                .unit(unit)
                .map(|u| u.uri().contains("/frag"))
                .unwrap_or(false);
            if is_fragment {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
            }
            self.inner.save(project, unit)
        }

        fn load(&self, uri: &str) -> Result<UnitDocument> {
            self.inner.load(uri)
        }

        fn stored_size(&self, unit: &PersistedUnit) -> Option<u64> {
            self.inner.stored_size(unit)
        }

        fn delete(&self, unit: &PersistedUnit) -> Result<()> {
            self.inner.delete(unit)
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.network.retry_backoff = Duration::from_millis(1);
        config
    }

    fn event_log() -> (
        Arc<Mutex<Vec<ProjectEvent>>>,
        impl ProjectObserver + 'static,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let observer = move |_: &Project, event: &ProjectEvent| sink.lock().push(event.clone());
        (log, observer)
    }

    fn local_space() -> ProjectSpace<MemorySerializer> {
        let project_id = ProjectId::new();
        let project = Project::new(project_id, format!("/mem/{}/main.vgp", project_id));
        ProjectSpace::new(project, MemorySerializer::new(), &config())
    }

    fn add_task(space: &ProjectSpace<MemorySerializer>, name: &str) -> NodeId {
        space
            .execute("add task", |p| {
                let root = p.root();
                p.add_node(root, "tasks", NodeSnapshot::new("Task").attribute("name", name))
            })
            .unwrap()
    }

    #[test]
    fn test_edits_are_recorded_and_persisted() {
        let space = local_space();
        let serializer = space.serializer();
        add_task(&space, "a");

        assert_eq!(space.status(), SpaceStatus::Dirty);
        assert_eq!(space.operation_count(), 1);
        assert!(serializer.save_count() > 0);
    }

    #[test]
    fn test_filtered_changes_are_not_recorded() {
        let space = local_space();
        space
            .edit(|p| {
                let root = p.root();
                p.set_transient(root, "hover", true)?;
                p.unset_attribute(root, "missing")
            })
            .unwrap();
        assert_eq!(space.status(), SpaceStatus::Clean);
    }

    #[test]
    fn test_failed_command_keeps_applied_changes_unflushed() {
        let space = local_space();
        let serializer = space.serializer();
        let result: Result<()> = space.execute("half done", |p| {
            let root = p.root();
            p.set_attribute(root, "name", "x")?;
            Err(Error::illegal_state("validation failed"))
        });
        assert!(result.is_err());
        assert_eq!(serializer.save_count(), 0);
        assert_eq!(space.operation_count(), 1);
        assert_eq!(space.save().unwrap().saved.len(), 1);
    }

    #[test]
    fn test_observers_run_after_recorder_by_priority() {
        let space = local_space();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("low", 0), ("high", 10)] {
            let order = order.clone();
            space.subscribe(priority, move |_: &Project, _: &ProjectEvent| order.lock().push(name));
        }
        let (log, observer) = event_log();
        let handle = space.subscribe(5, observer);

        add_task(&space, "a");
        assert_eq!(order.lock().as_slice(), &["high", "low", "high", "low"]);
        assert_eq!(log.lock().len(), 2);
        assert!(space.unsubscribe(handle));
    }

    #[tokio::test]
    async fn test_commit_requires_shared_project_and_changes() {
        let server = InMemoryServer::new();
        let space = local_space();
        let err = space.commit(&server, LogMessage::new("me", "x")).await.unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));

        space.share(&server, "p", "", "me").await.unwrap();
        let err = space.commit(&server, LogMessage::new("me", "x")).await.unwrap_err();
        assert!(matches!(err, Error::NoLocalChanges));
    }

    #[tokio::test]
    async fn test_share_commits_pending_work() {
        let server = InMemoryServer::new();
        let space = local_space();
        add_task(&space, "a");
        add_task(&space, "b");

        let marker = space.share(&server, "p", "demo", "me").await.unwrap();
        assert_eq!(marker.number, 1);
        assert_eq!(space.status(), SpaceStatus::Clean);
        assert_eq!(space.info().unwrap().version, marker);
        assert!(space.share(&server, "p", "demo", "me").await.is_err());
    }

    #[tokio::test]
    async fn test_commit_survives_lost_acknowledgement() {
        let server = InMemoryServer::new();
        let space = local_space();
        space.share(&server, "p", "", "me").await.unwrap();
        add_task(&space, "a");

        server.drop_commit_acks(1);
        let marker = space.commit(&server, LogMessage::new("me", "x")).await.unwrap();
        assert_eq!(marker.number, 1);
        assert_eq!(server.history(space.project_id()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commit_is_rejected() {
        let server = InMemoryServer::new().with_latency(Duration::from_millis(50));
        let space = local_space();
        space.share(&server, "p", "", "me").await.unwrap();
        add_task(&space, "a");

        let (first, second) = tokio::join!(
            space.commit(&server, LogMessage::new("me", "one")),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                space.commit(&server, LogMessage::new("me", "two")).await
            }
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::CommitInProgress(_))));

        let (update, commit) = tokio::join!(space.update(&server, VersionSpec::Head), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            space.commit(&server, LogMessage::new("me", "three")).await
        });
        assert_eq!(update.unwrap(), 0);
        assert!(matches!(commit, Err(Error::UpdateInProgress(_))));
        assert_eq!(space.status(), SpaceStatus::Clean);
    }

    #[tokio::test]
    async fn test_checkout_unknown_project_fails() {
        let server = InMemoryServer::new();
        let id = ProjectId::new();
        let err = ProjectSpace::checkout(&server, id, "/mem/x/main.vgp", MemorySerializer::new(), &config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Checkout(_)));
    }

    #[tokio::test]
    async fn test_update_drops_overlapping_local_change() {
        let server = InMemoryServer::new();
        let a = local_space();
        let task = add_task(&a, "orig");
        a.share(&server, "p", "", "a").await.unwrap();

        let b = ProjectSpace::checkout(&server, a.project_id(), "/mem/b/main.vgp", MemorySerializer::new(), &config())
            .await
            .unwrap();

        a.edit(|p| p.set_attribute(task, "name", "from a")).unwrap();
        a.commit(&server, LogMessage::new("a", "rename")).await.unwrap();

        b.edit(|p| p.set_attribute(task, "name", "from b")).unwrap();
        b.edit(|p| p.set_attribute(task, "done", true)).unwrap();
        assert_eq!(b.update(&server, VersionSpec::Head).await.unwrap(), 1);

        assert_eq!(b.operation_count(), 1);
        b.read(|p| {
            let node = p.node(task).unwrap();
            assert_eq!(node.attribute("name"), Some(&Value::from("from a")));
            assert_eq!(node.attribute("done"), Some(&Value::Bool(true)));
        });
        assert_eq!(b.base_version().number, 2);
    }

    #[tokio::test]
    async fn test_update_rejects_gaps() {
        assert!(check_contiguous(3, &[]).is_ok());
        let delta = VersionDelta {
            version: VersionMarker::new(5),
            base: 4,
            operations: Vec::new(),
            log_message: LogMessage::new("x", "y"),
        };
        assert!(matches!(
            check_contiguous(3, &[delta]),
            Err(Error::Network(NetworkError::Protocol(_)))
        ));
    }

    #[tokio::test]
    async fn test_delete_releases_units() {
        let space = local_space();
        let serializer = space.serializer();
        add_task(&space, "a");
        assert!(!serializer.is_empty());

        space.delete().unwrap();
        assert!(serializer.is_empty());
        assert!(space.is_deleted());
        assert!(matches!(
            space.edit(|p| p.set_attribute(p.root(), "x", 1i64)),
            Err(Error::Deleted(_))
        ));
    }
    #[test]
    fn test_failed_fragment_write_keeps_stored_project_loadable() {
        let mut config = config();
        config.persistence.max_unit_size_on_expand = 10;
        let project_id = ProjectId::new();
        let main_uri = format!("/p/{}/main.vgp", project_id);
        let serializer = FragmentsFail::default();
        let space = ProjectSpace::new(Project::new(project_id, main_uri.clone()), serializer.clone(), &config);
        space.save_all().unwrap();
        let before = space.read(|p| p.content_snapshot());

        let result = space.execute("add", |p| {
            let root = p.root();
            p.add_node(root, "tasks", NodeSnapshot::new("Task"))
        });
        assert!(result.is_err());
        assert_eq!(space.read(|p| p.units().count()), 2);

        let stored = load_project(&serializer, project_id, &main_uri).unwrap();
        assert_eq!(stored.content_snapshot(), before);
    }

    #[tokio::test]
    async fn test_update_stops_at_version_that_does_not_apply() {
        let server = InMemoryServer::new();
        let a = local_space();
        let task = add_task(&a, "orig");
        a.share(&server, "p", "", "a").await.unwrap();
        let b = ProjectSpace::checkout(&server, a.project_id(), "/mem/b/main.vgp", MemorySerializer::new(), &config())
            .await
            .unwrap();

        a.edit(|p| p.set_attribute(task, "name", "renamed")).unwrap();
        a.commit(&server, LogMessage::new("a", "rename")).await.unwrap();
        server
            .commit(CommitRequest {
                project: a.project_id(),
                base_version: 2,
                operations: vec![Operation::SetAttribute {
                    node: NodeId::new(),
                    feature: "name".into(),
                    old: None,
                    new: Some(Value::from("ghost")),
                }],
                log_message: LogMessage::new("c", "broken"),
                request_token: Uuid::new_v4(),
            })
            .await
            .unwrap();

        b.edit(|p| p.set_attribute(task, "done", true)).unwrap();
        assert!(b.update(&server, VersionSpec::Head).await.is_err());

        assert_eq!(b.base_version().number, 2);
        assert_eq!(b.info().unwrap().version.number, 2);
        assert_eq!(b.operation_count(), 1);
        b.read(|p| {
            let node = p.node(task).unwrap();
            assert_eq!(node.attribute("name"), Some(&Value::from("renamed")));
            assert_eq!(node.attribute("done"), Some(&Value::Bool(true)));
        });
        assert_eq!(b.status(), SpaceStatus::Dirty);
    }

    #[tokio::test]
    async fn test_cancelled_commit_leaves_local_state() {
        let server = InMemoryServer::new().with_latency(Duration::from_millis(50));
        let space = local_space();
        space.share(&server, "p", "", "me").await.unwrap();
        add_task(&space, "a");

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            space.commit(&server, LogMessage::new("me", "slow")),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(space.operation_count(), 1);
        assert_eq!(space.base_version().number, 0);
        assert_eq!(space.status(), SpaceStatus::Dirty);

        let marker = space.commit(&server, LogMessage::new("me", "again")).await.unwrap();
        assert_eq!(marker.number, 1);
        assert_eq!(space.status(), SpaceStatus::Clean);
    }
}
