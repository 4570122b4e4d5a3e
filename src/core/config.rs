//! Configuration management for the versioned graph
//!
//! Settings load from a TOML file, then environment variables override
//! individual values, then the whole configuration is validated.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default configuration file name looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "versioned-graph.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Autosave and unit splitting
    pub persistence: PersistenceConfig,

    /// Server round trips
    pub network: NetworkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Workspace location
    pub workspace: WorkspaceConfig,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Save dirty units automatically at command boundaries
    pub auto_save: bool,

    /// Allow new nodes to be placed into fresh fragment units
    pub resource_splitting: bool,

    /// Stored size (bytes) above which a unit is split on insertion
    pub max_unit_size_on_expand: u64,

    /// File extension of fragment units
    pub fragment_extension: String,

    /// On-disk encoding of units
    pub encoding: Encoding,

    /// Write durability of unit files
    pub durability: Durability,
}

/// Unit file encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// MessagePack
    Msgpack,
}

/// Unit file durability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Temp file plus atomic rename, no fsync
    #[default]
    BestEffort,
    /// Temp file, fsync, atomic rename, fsync of the directory
    Durable,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Timeout applied to every server call
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,

    /// Maximum retry attempts for retryable failures
    pub max_retries: u32,

    /// Delay between retries
    #[serde(with = "duration_str")]
    pub retry_backoff: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding one sub directory per project space
    pub root: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            resource_splitting: true,
            max_unit_size_on_expand: 1024 * 1024, // 1MB
            fragment_extension: ".vgf".to_string(),
            encoding: Encoding::default(),
            durability: Durability::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./workspace"),
        }
    }
}

impl Config {
    /// Load configuration from the default file (if present) and environment variables
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() {
            config = Self::from_file(DEFAULT_CONFIG_FILE)?;
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("VG_AUTO_SAVE") {
            self.persistence.auto_save = parse_bool(&v)
                .ok_or_else(|| Error::config(format!("Invalid VG_AUTO_SAVE: {}", v)))?;
        }

        if let Some(v) = var("VG_RESOURCE_SPLITTING") {
            self.persistence.resource_splitting = parse_bool(&v)
                .ok_or_else(|| Error::config(format!("Invalid VG_RESOURCE_SPLITTING: {}", v)))?;
        }

        if let Some(v) = var("VG_MAX_UNIT_SIZE") {
            self.persistence.max_unit_size_on_expand = v
                .parse()
                .map_err(|e| Error::config(format!("Invalid max unit size: {}", e)))?;
        }

        if let Some(v) = var("VG_REQUEST_TIMEOUT") {
            self.network.request_timeout = parse_duration(&v).map_err(Error::config)?;
        }

        if let Some(v) = var("VG_WORKSPACE") {
            self.workspace.root = PathBuf::from(v);
        }

        if let Some(level) = var("VG_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = var("VG_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.persistence.max_unit_size_on_expand == 0 {
            return Err(Error::config("max_unit_size_on_expand must be positive"));
        }

        let ext = &self.persistence.fragment_extension;
        if !ext.starts_with('.') || ext.len() < 2 || ext.contains(['/', '\\']) {
            return Err(Error::config(format!("Invalid fragment extension: {:?}", ext)));
        }

        if self.network.request_timeout.is_zero() {
            return Err(Error::config("request_timeout must be positive"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => return Err(Error::config("Invalid log format")),
        }

        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a duration such as `250ms`, `30s`, `5m`, `1h` or raw seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("Invalid duration: {:?}", s);
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid())
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|_| invalid())
    } else {
        s.parse().map(Duration::from_secs).map_err(|_| invalid())
    }
}

mod duration_str {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", d.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration string like '30s' or '250ms'")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
                super::parse_duration(value).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
                u64::try_from(value)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("negative duration"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
