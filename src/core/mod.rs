//! Core system types and foundations
//!
//! This module contains the fundamental building blocks shared by the graph,
//! tracking and versioning layers: identifiers, values, error handling and
//! configuration.

pub mod types;
pub mod error;
pub mod config;
pub mod utils;

// Re-export commonly used items
pub use types::{NodeId, UnitId, ProjectId, VersionId, Value};
pub use error::{Error, Result};
pub use config::Config;
