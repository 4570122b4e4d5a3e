//! Client side view of the versioning server

use crate::core::error::Result;
use crate::core::types::ProjectId;
use crate::versioning::version::{
    CommitRequest, CreateProject, ProjectInfo, VersionDelta, VersionMarker, VersionSpec,
};
use std::future::Future;

/// Channel to the single authority that serializes commits
///
/// The transport is up to the implementation; every call may fail with a
/// network error, which the caller retries when it is transient.
pub trait ServerChannel: Send + Sync {
    /// Current description and head version of a project
    ///
    /// # Returns
    ///
    /// * `Ok(info)` - Project metadata including the head version
    /// * `Err(Error::NotFound)` - If the server does not know the project
    fn project_info(&self, project: ProjectId) -> impl Future<Output = Result<ProjectInfo>> + Send;

    /// Deltas producing versions `(from, to]`, in version order
    fn fetch_deltas(
        &self,
        project: ProjectId,
        from: u64,
        to: VersionSpec,
    ) -> impl Future<Output = Result<Vec<VersionDelta>>> + Send;

    /// Append a version
    ///
    /// # Returns
    ///
    /// * `Ok(marker)` - The new head; a retried request returns the original marker
    /// * `Err(Error::Conflict)` - If `base_version` is not the current head
    fn commit(&self, request: CommitRequest) -> impl Future<Output = Result<VersionMarker>> + Send;

    /// Register a new project at version 0
    fn create_project(&self, request: CreateProject) -> impl Future<Output = Result<ProjectInfo>> + Send;
}
