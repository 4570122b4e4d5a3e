//! Workspace: the set of project spaces under one root directory
//!
//! Each space lives in `<root>/<project id>/` with its main unit in
//! `main.vgp`, fragment units next to it and the space metadata in
//! `space.json`.

use crate::core::config::Config;
use crate::core::error::{Error, Result, SerializationError};
use crate::core::types::ProjectId;
use crate::graph::{path_to_uri, Project};
use crate::storage::Serializer;
use crate::versioning::project_space::ProjectSpace;
use crate::versioning::server::ServerChannel;
use crate::versioning::version::VersionMarker;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const MAIN_UNIT: &str = "main.vgp";
const METADATA_FILE: &str = "space.json";

/// Registry of local project spaces
pub struct Workspace<S: Serializer + Clone> {
    root: PathBuf,
    config: Config,
    serializer: S,
    spaces: DashMap<ProjectId, Arc<ProjectSpace<S>>>,
}

impl<S: Serializer + Clone> Workspace<S> {
    /// Empty workspace rooted at `config.workspace.root`
    pub fn new(config: Config, serializer: S) -> Self {
        Self {
            root: config.workspace.root.clone(),
            config,
            serializer,
            spaces: DashMap::new(),
        }
    }

    /// Open a workspace, restoring every space found under the root
    ///
    /// Directories whose metadata cannot be read are skipped with a warning.
    pub fn open(config: Config, serializer: S) -> Result<Self> {
        let workspace = Self::new(config, serializer);
        let entries = match std::fs::read_dir(&workspace.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(workspace),
            Err(source) => {
                return Err(SerializationError::Io {
                    path: workspace.root.clone(),
                    source,
                }
                .into())
            }
        };

        for entry in entries.flatten() {
            let metadata = entry.path().join(METADATA_FILE);
            if !metadata.is_file() {
                continue;
            }
            match ProjectSpace::open(&metadata, workspace.serializer.clone(), &workspace.config) {
                Ok(space) => {
                    workspace.spaces.insert(space.project_id(), Arc::new(space));
                }
                Err(e) => warn!(path = %metadata.display(), error = %e, "Skipping unreadable project space"),
            }
        }
        info!(root = %workspace.root.display(), spaces = workspace.spaces.len(), "Opened workspace");
        Ok(workspace)
    }

    /// Workspace root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration shared by all spaces
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a new local project space
    pub fn create_project_space(&self) -> Result<Arc<ProjectSpace<S>>> {
        let project_id = ProjectId::new();
        let project = Project::new(project_id, self.main_uri(project_id));
        let space = ProjectSpace::new(project, self.serializer.clone(), &self.config)
            .with_metadata(self.metadata_path(project_id));
        space.save_all()?;

        let space = Arc::new(space);
        self.spaces.insert(project_id, space.clone());
        info!(project = %project_id, "Created project space");
        Ok(space)
    }

    /// Check out a server project into a new space
    pub async fn checkout<C: ServerChannel>(
        &self,
        server: &C,
        project_id: ProjectId,
    ) -> Result<Arc<ProjectSpace<S>>> {
        if self.spaces.contains_key(&project_id) {
            return Err(Error::illegal_state(format!(
                "project {} is already checked out",
                project_id
            )));
        }
        let space = ProjectSpace::checkout(
            server,
            project_id,
            self.main_uri(project_id),
            self.serializer.clone(),
            &self.config,
        )
        .await?
        .with_metadata(self.metadata_path(project_id));
        space.save()?;

        let space = Arc::new(space);
        self.spaces.insert(project_id, space.clone());
        Ok(space)
    }

    /// Share a local space with the server
    pub async fn share<C: ServerChannel>(
        &self,
        server: &C,
        project_id: ProjectId,
        name: &str,
        author: &str,
    ) -> Result<VersionMarker> {
        let space = self.require(project_id)?;
        space.share(server, name, "", author).await
    }

    /// Delete a space and its files
    pub fn delete_project_space(&self, project_id: ProjectId) -> Result<()> {
        let (_, space) = self
            .spaces
            .remove(&project_id)
            .ok_or_else(|| Error::not_found(format!("project space {}", project_id)))?;
        space.delete()?;

        let dir = self.space_dir(project_id);
        match std::fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            // leftovers that are not ours stay put
            Err(e) => warn!(path = %dir.display(), error = %e, "Project space directory not removed"),
        }
        Ok(())
    }

    /// Look up a space
    pub fn project_space(&self, project_id: ProjectId) -> Option<Arc<ProjectSpace<S>>> {
        self.spaces.get(&project_id).map(|s| s.value().clone())
    }

    /// All spaces
    pub fn project_spaces(&self) -> Vec<Arc<ProjectSpace<S>>> {
        self.spaces.iter().map(|s| s.value().clone()).collect()
    }

    /// Number of spaces
    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    /// Whether the workspace has no spaces
    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    fn require(&self, project_id: ProjectId) -> Result<Arc<ProjectSpace<S>>> {
        self.project_space(project_id)
            .ok_or_else(|| Error::not_found(format!("project space {}", project_id)))
    }

    fn space_dir(&self, project_id: ProjectId) -> PathBuf {
        self.root.join(project_id.to_string())
    }

    fn main_uri(&self, project_id: ProjectId) -> String {
        path_to_uri(&self.space_dir(project_id).join(MAIN_UNIT))
    }

    fn metadata_path(&self, project_id: ProjectId) -> PathBuf {
        self.space_dir(project_id).join(METADATA_FILE)
    }
}
