//! File backed serializer
//!
//! Every save encodes the unit document, writes it to a temp file next to the
//! target and renames it into place, so a crash never leaves a half-written
//! unit behind. With [`Durability::Durable`] the temp file and the directory
//! are fsynced as well.

use crate::core::config::{Durability, Encoding, PersistenceConfig};
use crate::core::error::{Result, SerializationError};
use crate::core::types::UnitId;
use crate::graph::{uri_to_path, PersistedUnit, Project};
use crate::storage::{Serializer, UnitDocument};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Serializer writing one file per unit
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSerializer {
    encoding: Encoding,
    durability: Durability,
}

impl FileSerializer {
    /// Create a serializer with explicit settings
    pub fn new(encoding: Encoding, durability: Durability) -> Self {
        Self {
            encoding,
            durability,
        }
    }

    /// Create a serializer from the persistence configuration
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(config.encoding, config.durability)
    }

    /// Encoding used for unit files
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn resolve(uri: &str) -> std::result::Result<PathBuf, SerializationError> {
        uri_to_path(uri).ok_or_else(|| SerializationError::UnresolvableUri(uri.to_string()))
    }
}

impl Serializer for FileSerializer {
    fn save(&self, project: &Project, unit: UnitId) -> Result<u64> {
        let document = UnitDocument::build(project, unit)?;
        let uri = project
            .unit(unit)
            .map(|u| u.uri().to_string())
            .unwrap_or_default();
        let path = Self::resolve(&uri)?;
        let bytes = document.encode(self.encoding)?;

        write_atomic(&path, &bytes, self.durability)?;
        debug!(unit = %unit, path = %path.display(), bytes = bytes.len(), "Saved unit");
        Ok(bytes.len() as u64)
    }

    fn load(&self, uri: &str) -> Result<UnitDocument> {
        let path = Self::resolve(uri)?;
        let bytes = fs::read(&path).map_err(|source| SerializationError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(UnitDocument::decode(&bytes, self.encoding)?)
    }

    fn stored_size(&self, unit: &PersistedUnit) -> Option<u64> {
        let path = unit.file_path()?;
        fs::metadata(path).ok().map(|m| m.len())
    }

    fn delete(&self, unit: &PersistedUnit) -> Result<()> {
        let path = Self::resolve(unit.uri())?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SerializationError::Io { path, source }.into()),
        }
    }
}

/// Write `contents` to `path` through a temp file and an atomic rename
pub fn write_atomic(
    path: &Path,
    contents: &[u8],
    durability: Durability,
) -> std::result::Result<(), SerializationError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| SerializationError::Io { path, source }
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| SerializationError::UnresolvableUri(path.display().to_string()))?;
    fs::create_dir_all(&parent).map_err(io_err(&parent))?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(".{}.tmp.{}", file_name.to_string_lossy(), nanos));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .map_err(io_err(&tmp_path))?;
    file.write_all(contents).map_err(io_err(&tmp_path))?;
    if durability == Durability::Durable {
        file.sync_all().map_err(io_err(&tmp_path))?;
    }
    drop(file);

    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(SerializationError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    if durability == Durability::Durable {
        #[cfg(unix)]
        {
            let dir = fs::File::open(&parent).map_err(io_err(&parent))?;
            dir.sync_all().map_err(io_err(&parent))?;
        }
    }

    Ok(())
}
