//! Repository configuration, persisted as `config.json`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::codec::CodecKind;
use crate::error::{Error, Result};
use crate::fsutil;

/// Name of the branch created by `init` unless configured otherwise
pub const DEFAULT_BRANCH: &str = "trunk";

/// File name of the configuration inside the repository directory
pub const CONFIG_FILE: &str = "config.json";

/// Tuning for the content store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Codec applied to newly written objects
    pub codec: CodecKind,
    /// Compression level passed to the codec
    pub compression_level: i32,
    /// Longest allowed chain of delta records; 0 disables delta storage
    pub max_delta_chain: u32,
    /// Blobs smaller than this are always stored in full
    pub min_delta_size: usize,
    /// Reconstructed blobs kept in memory; 0 disables the cache
    pub cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Zstd,
            compression_level: 3,
            max_delta_chain: 16,
            min_delta_size: 64,
            cache_capacity: 64,
        }
    }
}

/// Repository-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub uuid: String,
    pub created_at: DateTime<Utc>,
    /// Directory whose contents are versioned
    pub worktree: PathBuf,
    pub default_branch: String,
    #[serde(default)]
    pub store: StoreConfig,
}

impl RepositoryConfig {
    /// Fresh configuration for a repository tracking `worktree`
    pub fn new(worktree: impl Into<PathBuf>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            worktree: worktree.into(),
            default_branch: DEFAULT_BRANCH.to_string(),
            store: StoreConfig::default(),
        }
    }

    pub fn with_default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Load from `<repo_dir>/config.json`
    pub fn load(repo_dir: &Path) -> Result<Self> {
        let path = repo_dir.join(CONFIG_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotARepository(repo_dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Write to `<repo_dir>/config.json`
    pub fn save(&self, repo_dir: &Path) -> Result<()> {
        fs::create_dir_all(repo_dir)?;
        let data = serde_json::to_vec_pretty(self)?;
        fsutil::write_atomic(&repo_dir.join(CONFIG_FILE), &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_roundtrip_on_disk() {
        let tmp = TempDir::new().unwrap();
        let config = RepositoryConfig::new("/work").with_default_branch("main");
        config.save(tmp.path()).unwrap();

        let loaded = RepositoryConfig::load(tmp.path()).unwrap();
        assert_eq!(loaded.uuid, config.uuid);
        assert_eq!(loaded.uuid.len(), 36);
        assert_eq!(loaded.worktree, PathBuf::from("/work"));
        assert_eq!(loaded.default_branch, "main");
        assert_eq!(loaded.store, StoreConfig::default());
    }

    #[test]
    fn test_missing_config_is_not_a_repository() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            RepositoryConfig::load(tmp.path()),
            Err(Error::NotARepository(_))
        ));
    }

    #[test]
    fn test_partial_store_section_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let json = r#"{
            "uuid": "u",
            "created_at": "2024-01-01T00:00:00Z",
            "worktree": "/w",
            "default_branch": "trunk",
            "store": { "codec": "plain" }
        }"#;
        fs::write(tmp.path().join(CONFIG_FILE), json).unwrap();

        let loaded = RepositoryConfig::load(tmp.path()).unwrap();
        assert_eq!(loaded.store.codec, CodecKind::Plain);
        assert_eq!(loaded.store.max_delta_chain, 16);
    }
}
