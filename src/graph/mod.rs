//! Project graph data structures
//!
//! This module contains the in-memory node graph, persisted unit bookkeeping
//! and the change notifications every mutation emits.

pub mod event;
pub mod node;
pub mod notifier;
pub mod project;
pub mod unit;

// Re-export main graph types
pub use event::{
    ChangeEvent, ChangeKind, ContainmentSlot, Feature, FeatureKind, ProjectEvent, RemovedNode,
};
pub use node::{Node, NodeSnapshot};
pub use notifier::{ObserverHandle, ObserverList, ProjectObserver};
pub use project::Project;
pub use unit::{path_to_uri, sibling_uri, uri_to_path, PersistedUnit};
