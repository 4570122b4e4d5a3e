//! Versioned Graph - change tracking, incremental persistence and versioning
//! for hierarchical object graphs
//!
//! Projects are trees of nodes with attributes and cross references. Every
//! mutation emits a notification; the [`tracking`] layer turns significant
//! notifications into dirty persisted units and saves them at command
//! boundaries, splitting oversized units into fragments. The [`versioning`]
//! layer records the same notifications as operations and exchanges them
//! with a server through commit, update and checkout.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod graph;
pub mod storage;
pub mod system;
pub mod tracking;
pub mod versioning;

// Re-export commonly used items for convenience
pub use core::{Config, Error, NodeId, ProjectId, Result, UnitId, Value, VersionId};
pub use graph::{NodeSnapshot, Project, ProjectEvent};
pub use storage::{FileSerializer, MemorySerializer, Serializer};
pub use tracking::{CommandEvent, StatePersister};
pub use versioning::{InMemoryServer, LogMessage, ProjectSpace, VersionSpec, Workspace};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing and the metrics registry
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &core::config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.level))
        .map_err(|e| Error::config(format!("invalid log level {:?}: {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    if let Err(e) = installed {
        return Err(Error::config(format!("tracing already initialized: {}", e)));
    }

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    system::metrics::init_registry();

    Ok(())
}
