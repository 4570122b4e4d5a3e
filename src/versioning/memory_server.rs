//! In-process versioning server
//!
//! Serves as the single authority in tests, benchmarks and embedded setups.
//! Commits are serialized per project through the map entry lock; the commit
//! token table makes retried commits idempotent.

use crate::core::error::{Error, NetworkError, Result};
use crate::core::types::ProjectId;
use crate::versioning::server::ServerChannel;
use crate::versioning::version::{
    CommitRequest, CreateProject, ProjectInfo, VersionDelta, VersionMarker, VersionSpec,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
struct HostedProject {
    info: ProjectInfo,
    history: Vec<VersionDelta>,
    tokens: HashMap<Uuid, VersionMarker>,
}

/// Versioning server keeping every project history in memory
#[derive(Debug, Default)]
pub struct InMemoryServer {
    projects: DashMap<ProjectId, HostedProject>,
    latency: Option<Duration>,
    failures: AtomicU32,
    dropped_acks: AtomicU32,
}

impl InMemoryServer {
    /// Create an empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, e.g. to exercise timeouts and concurrent calls
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `count` calls with a connection error before doing any work
    pub fn inject_failures(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Accept the next `count` commits but report a connection error to the client
    pub fn drop_commit_acks(&self, count: u32) {
        self.dropped_acks.store(count, Ordering::SeqCst);
    }

    /// Remove a project and its history
    pub fn delete_project(&self, project: ProjectId) -> Result<()> {
        if self.projects.remove(&project).is_none() {
            return Err(Error::not_found(format!("project {}", project)));
        }
        info!(project = %project, "Deleted project");
        Ok(())
    }

    /// Number of hosted projects
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    /// Full history of a project
    pub fn history(&self, project: ProjectId) -> Result<Vec<VersionDelta>> {
        self.projects
            .get(&project)
            .map(|p| p.history.clone())
            .ok_or_else(|| Error::not_found(format!("project {}", project)))
    }

    async fn call_overhead(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(NetworkError::Connection("injected failure".to_string()).into());
        }
        Ok(())
    }
}

impl ServerChannel for InMemoryServer {
    async fn project_info(&self, project: ProjectId) -> Result<ProjectInfo> {
        self.call_overhead().await?;
        self.projects
            .get(&project)
            .map(|p| p.info.clone())
            .ok_or_else(|| Error::not_found(format!("project {}", project)))
    }

    async fn fetch_deltas(
        &self,
        project: ProjectId,
        from: u64,
        to: VersionSpec,
    ) -> Result<Vec<VersionDelta>> {
        self.call_overhead().await?;
        let hosted = self
            .projects
            .get(&project)
            .ok_or_else(|| Error::not_found(format!("project {}", project)))?;
        let to = to.resolve(hosted.info.version.number);
        Ok(hosted
            .history
            .iter()
            .filter(|d| d.version.number > from && d.version.number <= to)
            .cloned()
            .collect())
    }

    async fn commit(&self, request: CommitRequest) -> Result<VersionMarker> {
        self.call_overhead().await?;
        let mut hosted = self
            .projects
            .get_mut(&request.project)
            .ok_or_else(|| Error::not_found(format!("project {}", request.project)))?;

        if let Some(marker) = hosted.tokens.get(&request.request_token) {
            debug!(project = %request.project, version = marker.number, "Duplicate commit request");
            return Ok(*marker);
        }

        let head = hosted.info.version.number;
        if request.base_version != head {
            return Err(Error::Conflict {
                base: request.base_version,
                head,
            });
        }

        let marker = VersionMarker::new(head + 1);
        hosted.history.push(VersionDelta {
            version: marker,
            base: head,
            operations: request.operations,
            log_message: request.log_message,
        });
        hosted.tokens.insert(request.request_token, marker);
        hosted.info.version = marker;
        drop(hosted);

        let dropped = self
            .dropped_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if dropped.is_ok() {
            return Err(NetworkError::Connection("acknowledgement lost".to_string()).into());
        }
        Ok(marker)
    }

    async fn create_project(&self, request: CreateProject) -> Result<ProjectInfo> {
        self.call_overhead().await?;
        let project_id = request.project_id;
        match self.projects.entry(project_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::illegal_state(format!(
                "project {} already exists",
                project_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let info = ProjectInfo {
                    project_id,
                    name: request.name,
                    description: request.description,
                    version: VersionMarker::initial(project_id),
                };
                slot.insert(HostedProject {
                    info: info.clone(),
                    history: Vec::new(),
                    tokens: HashMap::new(),
                });
                info!(project = %project_id, name = %info.name, "Created project");
                Ok(info)
            }
        }
    }
}
