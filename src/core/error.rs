//! Error types and handling for the versioned graph
//!
//! Version conflicts, reentrancy violations and structural invariant
//! violations are kept apart from generic I/O failures so calling layers can
//! react to each (e.g. offer "update then retry" on a conflict).

use crate::core::types::{NodeId, ProjectId, UnitId};
use std::path::PathBuf;
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Save/load failure of a persisted unit or project metadata
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Server communication errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Graph mutation or operation replay errors
    #[error("Graph operation error: {0}")]
    Graph(#[from] GraphError),

    /// Commit rejected because the server moved past the local baseline
    #[error("Version conflict: local base version {base} is behind server head {head}")]
    Conflict {
        /// Version the local changes are based on
        base: u64,
        /// Current head version on the server
        head: u64,
    },

    /// A commit is already in flight for this project space
    #[error("Commit already in progress for project {0}")]
    CommitInProgress(ProjectId),

    /// An update is already in flight for this project space
    #[error("Update already in progress for project {0}")]
    UpdateInProgress(ProjectId),

    /// Structural invariant violation
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Checkout could not create a local project space
    #[error("Checkout failed: {0}")]
    Checkout(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Commit attempted with an empty operation log
    #[error("No local changes to commit")]
    NoLocalChanges,

    /// The project space has been deleted
    #[error("Project space {0} has been deleted")]
    Deleted(ProjectId),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Serialization errors raised by serializers
#[derive(Error, Debug)]
pub enum SerializationError {
    /// File system failure while reading or writing a unit
    #[error("I/O failed for {path:?}: {source}")]
    Io {
        /// File that was being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack serialization error
    #[error("MessagePack error: {0}")]
    MessagePack(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization error
    #[error("MessagePack decode error: {0}")]
    MessagePackDecode(#[from] rmp_serde::decode::Error),

    /// URI does not name a location this serializer can handle
    #[error("Unit URI cannot be resolved: {0}")]
    UnresolvableUri(String),

    /// Stored data is inconsistent
    #[error("Data corruption detected: {0}")]
    Corruption(String),
}

/// Server communication errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed or lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,

    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Graph mutation errors
#[derive(Error, Debug)]
pub enum GraphError {
    /// Node not found
    #[error("Node not found: {id}")]
    NodeNotFound {
        /// ID of the missing node
        id: NodeId,
    },

    /// Node already exists
    #[error("Node already exists: {id}")]
    NodeExists {
        /// ID of the duplicate node
        id: NodeId,
    },

    /// Unit not found
    #[error("Unit not found: {id}")]
    UnitNotFound {
        /// ID of the missing unit
        id: UnitId,
    },

    /// Index past the end of a list feature
    #[error("Index {index} out of bounds for feature {feature} (len {len})")]
    IndexOutOfBounds {
        /// Feature name
        feature: String,
        /// Requested index
        index: usize,
        /// Current length
        len: usize,
    },

    /// Reference missing from a reference list
    #[error("Node {node} does not reference {target} through {feature}")]
    ReferenceNotFound {
        /// Referencing node
        node: NodeId,
        /// Feature name
        feature: String,
        /// Expected target
        target: NodeId,
    },

    /// Containment would create a cycle
    #[error("Moving {node} under {parent} would create a containment cycle")]
    CycleDetected {
        /// Node being moved
        node: NodeId,
        /// Requested new container
        parent: NodeId,
    },

    /// The project root cannot be removed or moved
    #[error("The project root {0} cannot be detached")]
    RootImmutable(NodeId),

    /// Current state does not match what an operation expects
    #[error("State mismatch: {0}")]
    StateMismatch(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a checkout error
    pub fn checkout(msg: impl Into<String>) -> Self {
        Self::Checkout(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(NetworkError::Timeout) | Error::Network(NetworkError::Connection(_))
        )
    }

    /// Check if the server rejected the commit as out of date
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this is a reentrancy guard violation
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Error::CommitInProgress(_) | Error::UpdateInProgress(_))
    }
}
