//! Where a graph keeps its facts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EpochError, Result};

/// Environment variable naming the database file for [`GraphConfig::from_env`].
pub const DB_PATH_ENV: &str = "EPOCHGRAPH_DB_PATH";

const DEFAULT_CONFIG_NAME: &str = "epochgraph.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    File { path: String },
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub storage: StorageConfig,
}

impl GraphConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig::File { path: path.into() },
        }
    }

    pub fn memory() -> Self {
        Self {
            storage: StorageConfig::Memory,
        }
    }

    /// File storage at `$EPOCHGRAPH_DB_PATH` when set, memory otherwise.
    pub fn from_env() -> Self {
        match std::env::var(DB_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::file(path),
            _ => Self::memory(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| EpochError::Config(format!("read {}: {err}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|err| EpochError::Config(format!("parse {}: {err}", path.display())))
    }

    /// Load `epochgraph.json` from `base_dir`, writing a file-backed default
    /// pointing at `default_db` first if it does not exist.
    pub fn load_or_init(base_dir: &Path, default_db: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| EpochError::Config(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            return Self::load(&config_path);
        }
        let default = Self::file(default_db.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)?;
        fs::write(&config_path, payload)
            .map_err(|err| EpochError::Config(format!("write config: {err}")))?;
        Ok(default)
    }

    /// The database file, relative paths resolved against `base_dir`.
    /// `None` for in-memory storage.
    pub fn resolved_path(&self, base_dir: &Path) -> Option<PathBuf> {
        match &self.storage {
            StorageConfig::File { path } => {
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Some(candidate)
                } else {
                    Some(base_dir.join(candidate))
                }
            }
            StorageConfig::Memory => None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.storage {
            StorageConfig::File { .. } => "file",
            StorageConfig::Memory => "memory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tag_in_json() {
        let json = serde_json::to_value(GraphConfig::file("g.db")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"storage": {"backend": "file", "path": "g.db"}})
        );
        let memory: GraphConfig =
            serde_json::from_str(r#"{"storage": {"backend": "memory"}}"#).unwrap();
        assert_eq!(memory, GraphConfig::memory());
    }

    #[test]
    fn load_or_init_writes_then_reads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("conf");
        let first = GraphConfig::load_or_init(&base, Path::new("graph.db")).unwrap();
        assert!(base.join(DEFAULT_CONFIG_NAME).exists());
        let second = GraphConfig::load_or_init(&base, Path::new("other.db")).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            second.resolved_path(&base),
            Some(base.join("graph.db"))
        );
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(
            GraphConfig::load(file.path()),
            Err(EpochError::Config(_))
        ));
    }

    #[test]
    fn memory_has_no_path() {
        assert_eq!(GraphConfig::memory().resolved_path(Path::new("/tmp")), None);
        assert_eq!(GraphConfig::memory().backend_name(), "memory");
    }
}
