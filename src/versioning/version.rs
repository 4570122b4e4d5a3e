//! Version markers and the messages exchanged with the server

use crate::core::types::{ProjectId, VersionId};
use crate::core::utils::current_timestamp_millis;
use crate::versioning::operation::Operation;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A point in a project's server history
///
/// Version 0 is the empty project every history starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionMarker {
    /// Monotonically increasing version number
    pub number: u64,
    /// Opaque server-side identifier
    pub id: VersionId,
}

impl VersionMarker {
    /// Marker for version `number` with a fresh id
    pub fn new(number: u64) -> Self {
        Self {
            number,
            id: VersionId::new(),
        }
    }

    /// The empty initial version
    pub fn initial(project: ProjectId) -> Self {
        Self {
            number: 0,
            id: VersionId::from_uuid(*project.as_uuid()),
        }
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number)
    }
}

/// Which version a request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSpec {
    /// Latest version on the server
    Head,
    /// A specific version number
    Primary(u64),
}

impl VersionSpec {
    /// Resolve against the current head
    pub fn resolve(self, head: u64) -> u64 {
        match self {
            VersionSpec::Head => head,
            VersionSpec::Primary(n) => n.min(head),
        }
    }
}

/// Server-side project description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project identifier
    pub project_id: ProjectId,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Current head version
    pub version: VersionMarker,
}

/// Commit metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Committing user
    pub author: String,
    /// Commit message
    pub message: String,
    /// Client clock at commit time, milliseconds since the epoch
    pub client_date: u64,
}

impl LogMessage {
    /// Log message stamped with the current time
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            message: message.into(),
            client_date: current_timestamp_millis(),
        }
    }
}

/// The change set that produced one server version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDelta {
    /// Version produced by this delta
    pub version: VersionMarker,
    /// Version the delta was based on (`version.number - 1`)
    pub base: u64,
    /// Operations in application order
    pub operations: Vec<Operation>,
    /// Commit metadata
    pub log_message: LogMessage,
}

/// Client request to append a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Target project
    pub project: ProjectId,
    /// Version the operations are based on
    pub base_version: u64,
    /// Operations in application order
    pub operations: Vec<Operation>,
    /// Commit metadata
    pub log_message: LogMessage,
    /// Idempotency token; retries reuse it
    pub request_token: Uuid,
}

/// Client request to create a project on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProject {
    /// Identifier chosen by the client
    pub project_id: ProjectId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
}
