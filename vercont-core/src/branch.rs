//! Branch manager
//!
//! Named head pointers into the version graph plus the checked-out branch.
//! The table is a small JSON document replaced atomically on every change,
//! so a reader always sees one consistent snapshot of all heads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::graph::VersionGraph;
use crate::hash::VersionId;
use crate::lock::WriteLock;

/// File name of the branch table inside the repository directory
pub const BRANCHES_FILE: &str = "branches.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchRecord {
    head: Option<VersionId>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchTable {
    current: String,
    /// Version the working tree was last materialized from or saved as
    checked_out: Option<VersionId>,
    branches: BTreeMap<String, BranchRecord>,
}

/// Public view of one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub head: Option<VersionId>,
    pub current: bool,
    pub created_at: DateTime<Utc>,
}

/// Reject names that would be awkward on the command line or in paths
pub fn validate_branch_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with(['-', '.'])
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidBranchName(name.to_string()))
    }
}

pub struct BranchManager {
    path: PathBuf,
}

impl BranchManager {
    /// Branch table stored in `repo_dir`
    pub fn new(repo_dir: &Path) -> Self {
        Self {
            path: repo_dir.join(BRANCHES_FILE),
        }
    }

    /// Create the table with a single, checked-out, empty branch
    pub fn initialize(&self, lock: &WriteLock, default_branch: &str, now: DateTime<Utc>) -> Result<()> {
        validate_branch_name(default_branch)?;
        let mut branches = BTreeMap::new();
        branches.insert(
            default_branch.to_string(),
            BranchRecord {
                head: None,
                created_at: now,
            },
        );
        let table = BranchTable {
            current: default_branch.to_string(),
            checked_out: None,
            branches,
        };
        self.store(lock, &table)
    }

    fn load(&self) -> Result<BranchTable> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let repo_dir = self.path.parent().unwrap_or(Path::new("."));
                return Err(Error::NotARepository(repo_dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    fn store(&self, _lock: &WriteLock, table: &BranchTable) -> Result<()> {
        let data = serde_json::to_vec_pretty(table)?;
        fsutil::write_atomic(&self.path, &data)?;
        Ok(())
    }

    /// Create a branch, either empty or starting at `fork_point`
    pub fn create_branch(
        &self,
        lock: &WriteLock,
        name: &str,
        fork_point: Option<VersionId>,
        graph: &VersionGraph,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_branch_name(name)?;
        let mut table = self.load()?;
        if table.branches.contains_key(name) {
            return Err(Error::DuplicateBranch(name.to_string()));
        }
        if let Some(id) = fork_point {
            if !graph.contains(id) {
                return Err(Error::VersionNotFound(id));
            }
        }

        table.branches.insert(
            name.to_string(),
            BranchRecord {
                head: fork_point,
                created_at: now,
            },
        );
        self.store(lock, &table)?;

        match fork_point {
            Some(id) => tracing::info!("Created branch '{}' at {}", name, id),
            None => tracing::info!("Created empty branch '{}'", name),
        }
        Ok(())
    }

    /// Change the checked-out branch. The working tree is left alone.
    pub fn switch_branch(&self, lock: &WriteLock, name: &str) -> Result<()> {
        let mut table = self.load()?;
        if !table.branches.contains_key(name) {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        table.current = name.to_string();
        self.store(lock, &table)?;
        tracing::info!("Switched to branch '{}'", name);
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String> {
        Ok(self.load()?.current)
    }

    /// Head of the checked-out branch
    pub fn current_head(&self) -> Result<VersionId> {
        let table = self.load()?;
        let head = table
            .branches
            .get(&table.current)
            .and_then(|record| record.head);
        head.ok_or(Error::NoVersionsYet(table.current))
    }

    /// Head of a named branch; `None` if it was never saved to
    pub fn head(&self, name: &str) -> Result<Option<VersionId>> {
        self.load()?
            .branches
            .get(name)
            .map(|record| record.head)
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))
    }

    /// Move a branch head forward to a descendant of its current head
    pub fn advance_head(
        &self,
        lock: &WriteLock,
        name: &str,
        new_head: VersionId,
        graph: &VersionGraph,
    ) -> Result<()> {
        let mut table = self.load()?;
        let record = table
            .branches
            .get_mut(name)
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))?;

        match record.head {
            Some(head) if !graph.is_ancestor(head, new_head)? => {
                return Err(Error::NotAFastForward {
                    branch: name.to_string(),
                    head,
                    new: new_head,
                });
            }
            None if !graph.contains(new_head) => return Err(Error::VersionNotFound(new_head)),
            _ => {}
        }

        record.head = Some(new_head);
        self.store(lock, &table)?;
        tracing::info!("Advanced '{}' to {}", name, new_head);
        Ok(())
    }

    /// All branches, sorted by name
    pub fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        let table = self.load()?;
        Ok(table
            .branches
            .iter()
            .map(|(name, record)| BranchInfo {
                name: name.clone(),
                head: record.head,
                current: *name == table.current,
                created_at: record.created_at,
            })
            .collect())
    }

    /// Forget a branch name. Its versions stay in the graph.
    pub fn delete_branch(&self, lock: &WriteLock, name: &str) -> Result<()> {
        let mut table = self.load()?;
        if table.current == name {
            return Err(Error::BranchCheckedOut(name.to_string()));
        }
        if table.branches.remove(name).is_none() {
            return Err(Error::BranchNotFound(name.to_string()));
        }
        self.store(lock, &table)?;
        tracing::info!("Deleted branch '{}'", name);
        Ok(())
    }

    pub fn rename_branch(&self, lock: &WriteLock, from: &str, to: &str) -> Result<()> {
        validate_branch_name(to)?;
        let mut table = self.load()?;
        if table.branches.contains_key(to) {
            return Err(Error::DuplicateBranch(to.to_string()));
        }
        let record = table
            .branches
            .remove(from)
            .ok_or_else(|| Error::BranchNotFound(from.to_string()))?;
        table.branches.insert(to.to_string(), record);
        if table.current == from {
            table.current = to.to_string();
        }
        self.store(lock, &table)?;
        tracing::info!("Renamed branch '{}' to '{}'", from, to);
        Ok(())
    }

    /// Version the working tree currently mirrors
    pub fn checked_out(&self) -> Result<Option<VersionId>> {
        Ok(self.load()?.checked_out)
    }

    pub fn set_checked_out(&self, lock: &WriteLock, id: Option<VersionId>) -> Result<()> {
        let mut table = self.load()?;
        table.checked_out = id;
        self.store(lock, &table)
    }
}
