//! Daemon configuration, read from a TOML file.
//!
//! ```toml
//! [store]
//! dir = "/var/cache/hive/blobs"
//! memory_entries = 4096
//!
//! [attr]
//! root = "/src/project"
//!
//! [server]
//! listen_addr = "0.0.0.0:7070"
//! log_level = "debug"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use blobs_store::StoreConfig;
use common::attr::AttrCacheConfig;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "hive";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const BLOBS_DIR_NAME: &str = "blobs";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreSection,
    pub attr: AttrSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Blob directory. Defaults to `~/.hive/blobs`.
    pub dir: Option<PathBuf>,
    /// Payloads smaller than this many bytes take the in-memory path.
    pub memory_limit: u64,
    /// LRU slots; 0 disables the memory layer.
    pub memory_entries: usize,
    pub serve_chunk_size: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        let defaults = StoreConfig::default();
        Self {
            dir: None,
            memory_limit: defaults.memory_limit,
            memory_entries: defaults.memory_entries,
            serve_chunk_size: defaults.serve_chunk_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrSection {
    /// Tree mirrored by the attribute cache. Defaults to the working
    /// directory.
    pub root: Option<PathBuf>,
    pub paranoia: bool,
    pub refresh_parallelism: usize,
}

impl Default for AttrSection {
    fn default() -> Self {
        let defaults = AttrCacheConfig::default();
        Self {
            root: None,
            paranoia: defaults.paranoia,
            refresh_parallelism: defaults.refresh_parallelism,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: SocketAddr,
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7070)),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// `~/.hive`
    pub fn hive_dir() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::hive_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Options for the blob store, resolving the default directory.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let dir = match &self.store.dir {
            Some(dir) => dir.clone(),
            None => Self::hive_dir()?.join(BLOBS_DIR_NAME),
        };
        Ok(StoreConfig {
            dir,
            memory_limit: self.store.memory_limit,
            memory_entries: self.store.memory_entries,
            serve_chunk_size: self.store.serve_chunk_size,
        })
    }

    pub fn attr_config(&self) -> AttrCacheConfig {
        AttrCacheConfig {
            paranoia: self.attr.paranoia,
            refresh_parallelism: self.attr.refresh_parallelism,
        }
    }

    pub fn attr_root(&self) -> PathBuf {
        self.attr.root.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [store]
            dir = "/tmp/blobs"
            memory_entries = 0

            [server]
            listen_addr = "0.0.0.0:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.dir, Some(PathBuf::from("/tmp/blobs")));
        assert_eq!(config.store.memory_entries, 0);
        assert_eq!(config.store.memory_limit, 128 * 1024);
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.attr, AttrSection::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_bad_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\nmemory_entries = \"many\"\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
