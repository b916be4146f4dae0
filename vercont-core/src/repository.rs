//! Repository facade
//!
//! Ties the content store, version graph and branch table of one repository
//! directory together and takes the repository lock around each operation.
//!
//! Layout on disk:
//! ```text
//! {root}/
//!   config.json                  RepositoryConfig
//!   lock                         flock target
//!   branches.json                branch heads, current branch, checked-out version
//!   objects/{hash[0..2]}/{hash[2..]}   content-addressed blobs
//!   versions/{id:012}.ver        version records (bincode, append-only)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::branch::{BranchInfo, BranchManager};
use crate::clock::{Clock, SystemClock};
use crate::config::{CONFIG_FILE, RepositoryConfig};
use crate::error::{Error, Result};
use crate::graph::{ChangeKind, History, PathChange, Version, VersionGraph, compare_entries};
use crate::hash::{BlobHash, VersionId};
use crate::lock::RepoLock;
use crate::store::{ContentStore, StoreStats};
use crate::worktree::Snapshot;

/// Aggregate numbers for `stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryStats {
    pub versions: usize,
    pub branches: usize,
    pub store: StoreStats,
}

pub struct Repository {
    pub(crate) root: PathBuf,
    pub(crate) config: RepositoryConfig,
    pub(crate) lock: RepoLock,
    pub(crate) store: ContentStore,
    pub(crate) graph: VersionGraph,
    pub(crate) branches: BranchManager,
    pub(crate) clock: Box<dyn Clock>,
}

impl Repository {
    /// Create a repository in `root` versioning the directory `worktree`
    pub fn init(root: &Path, worktree: &Path) -> Result<Self> {
        Self::init_with_config(root, RepositoryConfig::new(worktree))
    }

    pub fn init_with_config(root: &Path, config: RepositoryConfig) -> Result<Self> {
        if root.join(CONFIG_FILE).exists() {
            return Err(Error::AlreadyInitialized(root.to_path_buf()));
        }
        std::fs::create_dir_all(root)?;
        std::fs::create_dir_all(&config.worktree)?;

        let lock = RepoLock::new(root);
        let guard = lock.write()?;
        config.save(root)?;
        let repo = Self::assemble(root, config, lock)?;
        repo.branches
            .initialize(&guard, &repo.config.default_branch, repo.clock.now())?;
        drop(guard);

        tracing::info!(
            "Initialized repository {} at {:?} (worktree {:?})",
            repo.config.uuid,
            root,
            repo.config.worktree
        );
        Ok(repo)
    }

    /// Open an existing repository
    pub fn open(root: &Path) -> Result<Self> {
        let config = RepositoryConfig::load(root)?;
        Self::assemble(root, config, RepoLock::new(root))
    }

    fn assemble(root: &Path, config: RepositoryConfig, lock: RepoLock) -> Result<Self> {
        let store = ContentStore::open(&root.join("objects"), config.store.clone())?;
        let graph = VersionGraph::open(&root.join("versions"))?;
        let branches = BranchManager::new(root);
        Ok(Self {
            root: root.to_path_buf(),
            config,
            lock,
            store,
            graph,
            branches,
            clock: Box::new(SystemClock),
        })
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn worktree(&self) -> &Path {
        &self.config.worktree
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn graph(&self) -> &VersionGraph {
        &self.graph
    }

    // ==================== Branches ====================

    /// Create a branch at `fork_point`, or an empty one for a new history
    pub fn create_branch(&self, name: &str, fork_point: Option<VersionId>) -> Result<()> {
        let lock = self.lock.write()?;
        self.branches
            .create_branch(&lock, name, fork_point, &self.graph, self.clock.now())
    }

    /// Create a branch starting at the head of the checked-out branch
    pub fn fork_branch(&self, name: &str) -> Result<VersionId> {
        let lock = self.lock.write()?;
        let head = self.branches.current_head()?;
        self.branches
            .create_branch(&lock, name, Some(head), &self.graph, self.clock.now())?;
        Ok(head)
    }

    /// Change the checked-out branch without touching the working tree
    pub fn switch_branch(&self, name: &str) -> Result<()> {
        let lock = self.lock.write()?;
        self.branches.switch_branch(&lock, name)
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        let lock = self.lock.write()?;
        self.branches.delete_branch(&lock, name)
    }

    pub fn rename_branch(&self, from: &str, to: &str) -> Result<()> {
        let lock = self.lock.write()?;
        self.branches.rename_branch(&lock, from, to)
    }

    pub fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        let _lock = self.lock.read()?;
        self.branches.list_branches()
    }

    pub fn current_branch(&self) -> Result<String> {
        let _lock = self.lock.read()?;
        self.branches.current_branch()
    }

    pub fn current_head(&self) -> Result<VersionId> {
        let _lock = self.lock.read()?;
        self.branches.current_head()
    }

    pub fn branch_head(&self, name: &str) -> Result<Option<VersionId>> {
        let _lock = self.lock.read()?;
        self.branches.head(name)
    }

    /// Version the working tree was last synchronized with
    pub fn checked_out(&self) -> Result<Option<VersionId>> {
        let _lock = self.lock.read()?;
        self.branches.checked_out()
    }

    // ==================== Versions ====================

    pub fn get_version(&self, id: VersionId) -> Result<Version> {
        self.graph.get_version(id)
    }

    /// Lazy newest-first walk from `head` to its root. Version records are
    /// immutable, so the walk needs no lock.
    pub fn history(&self, head: VersionId) -> History<'_> {
        self.graph.history(head)
    }

    /// Full history of a branch, newest first; empty for a branch never saved to
    pub fn branch_history(&self, name: &str) -> Result<Vec<Version>> {
        match self.branch_head(name)? {
            Some(head) => self.graph.history(head).collect(),
            None => Ok(Vec::new()),
        }
    }

    pub fn diff_versions(&self, a: VersionId, b: VersionId) -> Result<Vec<PathChange>> {
        self.graph.diff_versions(a, b, &self.store)
    }

    /// Reconstructed bytes of one file in one version
    pub fn read_file(&self, id: VersionId, path: &str) -> Result<bytes::Bytes> {
        let version = self.graph.get_version(id)?;
        let hash = version
            .get(path)
            .ok_or_else(|| Error::InvalidPath(format!("{} is not in {}", path, id)))?;
        self.store.get(hash)
    }

    /// Resolve `r<N>`, `<N>`, `head`, `head~<N>` or `-<N>` (1-based from the
    /// head: `-1` is the head itself) to a version id
    pub fn resolve(&self, selector: &str) -> Result<VersionId> {
        let selector = selector.trim();
        let steps = if selector == "head" {
            Some(0)
        } else if let Some(n) = selector.strip_prefix("head~") {
            Some(n.parse::<usize>().map_err(|_| bad_selector(selector))?)
        } else if let Some(n) = selector.strip_prefix('-') {
            let n = n.parse::<usize>().map_err(|_| bad_selector(selector))?;
            Some(n.checked_sub(1).ok_or_else(|| bad_selector(selector))?)
        } else {
            None
        };

        match steps {
            Some(steps) => {
                let head = self.current_head()?;
                self.graph.nth_ancestor(head, steps)
            }
            None => {
                let id: VersionId = selector.parse().map_err(|_| bad_selector(selector))?;
                if self.graph.contains(id) {
                    Ok(id)
                } else {
                    Err(Error::VersionNotFound(id))
                }
            }
        }
    }

    // ==================== Working tree ====================

    /// Capture the working tree, leaving out the repository itself when it
    /// lives inside it
    pub fn snapshot_worktree(&self) -> Result<Snapshot> {
        Snapshot::capture(&self.config.worktree, std::slice::from_ref(&self.root))
    }

    /// Paths of the checked-out (or, failing that, head) version
    pub(crate) fn tracked_entries(&self) -> Result<BTreeMap<String, BlobHash>> {
        let id = match self.branches.checked_out()? {
            Some(id) => Some(id),
            None => match self.branches.current_head() {
                Ok(id) => Some(id),
                Err(Error::NoVersionsYet(_)) => None,
                Err(e) => return Err(e),
            },
        };
        match id {
            Some(id) => Ok(self.graph.get_version(id)?.entries),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Differences of the working tree against the checked-out version
    pub fn status(&self) -> Result<Vec<(String, ChangeKind)>> {
        let _lock = self.lock.read()?;
        let tracked = self.tracked_entries()?;
        let current = self.snapshot_worktree()?.hashes();
        Ok(compare_entries(&tracked, &current))
    }

    pub fn stats(&self) -> Result<RepositoryStats> {
        let _lock = self.lock.read()?;
        Ok(RepositoryStats {
            versions: self.graph.count()?,
            branches: self.branches.list_branches()?.len(),
            store: self.store.stats()?,
        })
    }
}

fn bad_selector(selector: &str) -> Error {
    Error::InvalidPath(format!("not a version selector: {}", selector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_and_open() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let work = tmp.path().join("work");

        let repo = Repository::init(&root, &work).unwrap();
        let uuid = repo.config().uuid.clone();
        assert_eq!(repo.current_branch().unwrap(), "trunk");
        drop(repo);

        let repo = Repository::open(&root).unwrap();
        assert_eq!(repo.config().uuid, uuid);
        assert_eq!(repo.worktree(), work.as_path());
        assert!(matches!(repo.current_head(), Err(Error::NoVersionsYet(_))));
    }

    #[test]
    fn test_init_twice_fails() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        Repository::init(&root, tmp.path()).unwrap();
        assert!(matches!(
            Repository::init(&root, tmp.path()),
            Err(Error::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_open_missing_repository() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            Repository::open(tmp.path()),
            Err(Error::NotARepository(_))
        ));
    }

    #[test]
    fn test_resolve_selectors() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        let repo = Repository::init(&tmp.path().join("repo"), &work).unwrap();

        for i in 0..3 {
            let mut snapshot = Snapshot::new();
            snapshot.insert("f.txt", format!("v{}", i)).unwrap();
            repo.save(&snapshot, "trunk", None).unwrap();
        }

        assert_eq!(repo.resolve("head").unwrap(), VersionId::new(3));
        assert_eq!(repo.resolve("-1").unwrap(), VersionId::new(3));
        assert_eq!(repo.resolve("-3").unwrap(), VersionId::new(1));
        assert_eq!(repo.resolve("head~1").unwrap(), VersionId::new(2));
        assert_eq!(repo.resolve("r2").unwrap(), VersionId::new(2));
        assert_eq!(repo.resolve("1").unwrap(), VersionId::new(1));
        assert!(matches!(repo.resolve("r9"), Err(Error::VersionNotFound(_))));
        assert!(repo.resolve("-0").is_err());
        assert!(repo.resolve("banana").is_err());
    }

    #[test]
    fn test_status_reports_worktree_changes() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        let repo = Repository::init(&work.join(".vercont"), &work).unwrap();

        std::fs::write(work.join("a.txt"), b"a").unwrap();
        std::fs::write(work.join("b.txt"), b"b").unwrap();
        repo.save_worktree(None).unwrap();
        assert!(repo.status().unwrap().is_empty());

        std::fs::write(work.join("a.txt"), b"changed").unwrap();
        std::fs::remove_file(work.join("b.txt")).unwrap();
        std::fs::write(work.join("c.txt"), b"c").unwrap();

        assert_eq!(
            repo.status().unwrap(),
            vec![
                ("a.txt".to_string(), ChangeKind::Modified),
                ("b.txt".to_string(), ChangeKind::Removed),
                ("c.txt".to_string(), ChangeKind::Added),
            ]
        );
    }
}
