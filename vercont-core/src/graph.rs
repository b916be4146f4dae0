//! Version graph
//!
//! An append-only table of immutable versions, one bincode file per version
//! under `versions/`. Each version links to its parent by id, and a parent id
//! is always smaller than its child's, so every parent chain ends at a root.
//! Branches fork but never merge: the graph is a forest of linear chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::diff::{self, Patch};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::hash::{BlobHash, VersionId};
use crate::lock::WriteLock;
use crate::store::ContentStore;

const VERSION_EXT: &str = "ver";

/// A saved state of the whole working tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub parent: Option<VersionId>,
    pub timestamp: DateTime<Utc>,
    /// Branch the version was saved on
    pub branch: String,
    pub message: Option<String>,
    /// Relative path -> content hash, for every file in the tree
    pub entries: BTreeMap<String, BlobHash>,
}

impl Version {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn get(&self, path: &str) -> Option<BlobHash> {
        self.entries.get(path).copied()
    }

    pub fn paths(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }
}

/// How a path differs between two trees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ChangeKind::Added => "A",
            ChangeKind::Removed => "D",
            ChangeKind::Modified => "M",
        };
        f.write_str(tag)
    }
}

/// Content-level change of one path between two versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added { hash: BlobHash },
    Removed { hash: BlobHash },
    Modified {
        old: BlobHash,
        new: BlobHash,
        patch: Patch,
    },
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Added { .. } => ChangeKind::Added,
            Change::Removed { .. } => ChangeKind::Removed,
            Change::Modified { .. } => ChangeKind::Modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub path: String,
    pub change: Change,
}

/// Compare two path maps, sorted by path
pub fn compare_entries(
    old: &BTreeMap<String, BlobHash>,
    new: &BTreeMap<String, BlobHash>,
) -> Vec<(String, ChangeKind)> {
    let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    paths
        .into_iter()
        .filter_map(|path| {
            let kind = match (old.get(path), new.get(path)) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(a), Some(b)) if a != b => ChangeKind::Modified,
                _ => return None,
            };
            Some((path.clone(), kind))
        })
        .collect()
}

/// Append-only store of versions
pub struct VersionGraph {
    dir: PathBuf,
}

impl VersionGraph {
    /// Open or create the graph in `dir` (the `versions` directory)
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, id: VersionId) -> PathBuf {
        self.dir.join(format!("{:012}.{}", id.get(), VERSION_EXT))
    }

    /// Append a new version and return its id
    ///
    /// Fails with `InvalidParent` when `parent` is not in the graph and with
    /// `EmptyVersion` when a root version would have no files. Non-root
    /// versions may be empty (every file deleted).
    pub fn create_version(
        &self,
        _lock: &WriteLock,
        parent: Option<VersionId>,
        entries: BTreeMap<String, BlobHash>,
        branch: &str,
        timestamp: DateTime<Utc>,
        message: Option<String>,
    ) -> Result<VersionId> {
        match parent {
            Some(parent) if !self.contains(parent) => return Err(Error::InvalidParent(parent)),
            None if entries.is_empty() => return Err(Error::EmptyVersion),
            _ => {}
        }

        let id = match self.latest_id()? {
            Some(latest) => latest.next(),
            None => VersionId::new(1),
        };
        let path = self.record_path(id);
        if path.exists() {
            return Err(Error::Corrupted(format!("version {} already recorded", id)));
        }

        let version = Version {
            id,
            parent,
            timestamp,
            branch: branch.to_string(),
            message,
            entries,
        };
        let data = bincode::serialize(&version)?;
        fsutil::write_atomic(&path, &data)?;

        tracing::info!(
            "Created version {} on '{}' (parent: {}, {} files)",
            id,
            branch,
            parent.map_or_else(|| "none".to_string(), |p| p.to_string()),
            version.entries.len()
        );
        Ok(id)
    }

    /// Load a version
    pub fn get_version(&self, id: VersionId) -> Result<Version> {
        let data = match fs::read(self.record_path(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::VersionNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        let version: Version = bincode::deserialize(&data)?;
        if version.id != id {
            return Err(Error::Corrupted(format!(
                "record for {} holds version {}",
                id, version.id
            )));
        }
        Ok(version)
    }

    pub fn contains(&self, id: VersionId) -> bool {
        self.record_path(id).is_file()
    }

    /// Ids of all recorded versions, ascending
    pub fn ids(&self) -> Result<Vec<VersionId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VERSION_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(VersionId::new(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn latest_id(&self) -> Result<Option<VersionId>> {
        Ok(self.ids()?.pop())
    }

    /// Total number of versions across all branches
    pub fn count(&self) -> Result<usize> {
        Ok(self.ids()?.len())
    }

    /// Walk parent links from `head` back to its root, newest first.
    /// Each call starts a fresh walk.
    pub fn history(&self, head: VersionId) -> History<'_> {
        History {
            graph: self,
            next: Some(head),
        }
    }

    /// The version `n` steps up the parent chain from `head`
    pub fn nth_ancestor(&self, head: VersionId, n: usize) -> Result<VersionId> {
        match self.history(head).nth(n) {
            Some(version) => Ok(version?.id),
            None => Err(Error::InvalidPath(format!("{}~{} is past the root", head, n))),
        }
    }

    /// True when `ancestor` is `descendant` or lies on its parent chain
    pub fn is_ancestor(&self, ancestor: VersionId, descendant: VersionId) -> Result<bool> {
        for version in self.history(descendant) {
            let version = version?;
            if version.id == ancestor {
                return Ok(true);
            }
            // Ids only decrease along the chain.
            if version.id < ancestor {
                break;
            }
        }
        Ok(false)
    }

    /// Per-path differences from version `a` to version `b`
    pub fn diff_versions(
        &self,
        a: VersionId,
        b: VersionId,
        store: &ContentStore,
    ) -> Result<Vec<PathChange>> {
        let old = self.get_version(a)?;
        let new = self.get_version(b)?;

        compare_entries(&old.entries, &new.entries)
            .into_iter()
            .map(|(path, kind)| -> Result<PathChange> {
                let change = match kind {
                    ChangeKind::Added => Change::Added {
                        hash: new.entries[&path],
                    },
                    ChangeKind::Removed => Change::Removed {
                        hash: old.entries[&path],
                    },
                    ChangeKind::Modified => {
                        let (old_hash, new_hash) = (old.entries[&path], new.entries[&path]);
                        let patch = diff::diff(&store.get(old_hash)?, &store.get(new_hash)?);
                        Change::Modified {
                            old: old_hash,
                            new: new_hash,
                            patch,
                        }
                    }
                };
                Ok(PathChange { path, change })
            })
            .collect()
    }
}

/// Lazy newest-first walk over a parent chain
#[derive(Clone)]
pub struct History<'a> {
    graph: &'a VersionGraph,
    next: Option<VersionId>,
}

impl Iterator for History<'_> {
    type Item = Result<Version>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        let version = match self.graph.get_version(id) {
            Ok(version) => version,
            Err(e) => return Some(Err(e)),
        };
        match version.parent {
            Some(parent) if parent >= version.id => Some(Err(Error::Corrupted(format!(
                "version {} has non-decreasing parent {}",
                version.id, parent
            )))),
            parent => {
                self.next = parent;
                Some(Ok(version))
            }
        }
    }
}
