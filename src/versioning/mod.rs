//! Commit, update and checkout against a versioning server
//!
//! A [`ProjectSpace`] records local changes as [`Operation`]s, commits them
//! as a new version and folds server versions into the local state. The
//! [`Workspace`] keeps the spaces of one root directory together.

pub mod memory_server;
pub mod operation;
pub mod project_space;
pub mod retry;
pub mod server;
pub mod version;
pub mod workspace;

pub use memory_server::InMemoryServer;
pub use operation::{apply_all, rollback, Operation};
pub use project_space::{ProjectSpace, SpaceMetadata, SpaceStatus};
pub use retry::with_retry;
pub use server::ServerChannel;
pub use version::{
    CommitRequest, CreateProject, LogMessage, ProjectInfo, VersionDelta, VersionMarker, VersionSpec,
};
pub use workspace::Workspace;
