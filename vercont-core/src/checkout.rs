//! Save, checkout and revert
//!
//! `checkout` never overwrites a file in place. Every file of the target
//! version is first written into a scratch directory inside the target, then
//! swapped in by rename while the replaced and removed files are moved aside.
//! Each rename is journaled; if any step fails the journal is replayed
//! backwards and the target is left as it was.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::hash::{BlobHash, VersionId};
use crate::lock::WriteLock;
use crate::repository::Repository;
use crate::worktree::{STAGING_PREFIX, Snapshot};

/// What a checkout did to the target directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckoutSummary {
    pub written: usize,
    pub removed: usize,
    pub unchanged: usize,
}

enum Undo {
    Restore { backup: PathBuf, original: PathBuf },
    Remove(PathBuf),
}

/// Journaled renames into one target directory
struct Swap<'a> {
    target: &'a Path,
    backup_dir: PathBuf,
    journal: Vec<Undo>,
}

impl<'a> Swap<'a> {
    fn new(target: &'a Path, backup_dir: PathBuf) -> Self {
        Self {
            target,
            backup_dir,
            journal: Vec::new(),
        }
    }

    fn back_up(&mut self, original: &Path) -> io::Result<()> {
        let backup = self.backup_dir.join(self.journal.len().to_string());
        fs::rename(original, &backup)?;
        self.journal.push(Undo::Restore {
            backup,
            original: original.to_path_buf(),
        });
        Ok(())
    }

    fn place(&mut self, staged: &Path, dest: &Path) -> io::Result<()> {
        match fs::symlink_metadata(dest) {
            Ok(meta) if meta.is_dir() => {
                return Err(io::Error::other(format!("{} is a directory", dest.display())));
            }
            Ok(_) => self.back_up(dest)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staged, dest)?;
        self.journal.push(Undo::Remove(dest.to_path_buf()));
        Ok(())
    }

    /// Undo every journaled rename, newest first. Returns false if anything
    /// could not be restored.
    fn rollback(self) -> bool {
        let mut clean = true;
        for undo in self.journal.into_iter().rev() {
            match undo {
                Undo::Remove(path) => {
                    if let Err(e) = fs::remove_file(&path) {
                        tracing::warn!("Rollback could not remove {:?}: {}", path, e);
                        clean = false;
                    }
                    fsutil::prune_empty_parents(&path, self.target);
                }
                Undo::Restore { backup, original } => {
                    if let Some(parent) = original.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    if let Err(e) = fs::rename(&backup, &original) {
                        tracing::warn!("Rollback could not restore {:?}: {}", original, e);
                        clean = false;
                    }
                }
            }
        }
        clean
    }
}

impl Repository {
    /// Store every file of `snapshot` and record it as a new version on
    /// `branch`, parented at the branch head
    ///
    /// Returns `NoChanges` when the snapshot equals the head version.
    pub fn save(&self, snapshot: &Snapshot, branch: &str, message: Option<&str>) -> Result<VersionId> {
        let lock = self.lock.write()?;
        self.save_locked(&lock, snapshot, branch, message)
    }

    /// Save the working tree on the checked-out branch
    pub fn save_worktree(&self, message: Option<&str>) -> Result<VersionId> {
        let lock = self.lock.write()?;
        let snapshot = self.snapshot_worktree()?;
        let branch = self.branches.current_branch()?;
        let id = self.save_locked(&lock, &snapshot, &branch, message)?;
        self.branches.set_checked_out(&lock, Some(id))?;
        Ok(id)
    }

    fn save_locked(
        &self,
        lock: &WriteLock,
        snapshot: &Snapshot,
        branch: &str,
        message: Option<&str>,
    ) -> Result<VersionId> {
        let parent = self.branches.head(branch)?;
        let parent_entries = match parent {
            Some(id) => self.graph.get_version(id)?.entries,
            None => BTreeMap::new(),
        };

        match parent {
            Some(head) if snapshot.hashes() == parent_entries => {
                return Err(Error::NoChanges {
                    branch: branch.to_string(),
                    head,
                });
            }
            None if snapshot.is_empty() => return Err(Error::EmptyVersion),
            _ => {}
        }

        let mut entries = BTreeMap::new();
        for (path, data) in snapshot.iter() {
            // The previous content of the same path is the natural delta base.
            let base = parent_entries.get(path).copied();
            let hash = self.store.put_with_base(lock, data, base)?;
            entries.insert(path.to_string(), hash);
        }

        let id = self.graph.create_version(
            lock,
            parent,
            entries,
            branch,
            self.clock.now(),
            message.map(str::to_string),
        )?;
        self.branches.advance_head(lock, branch, id, &self.graph)?;
        Ok(id)
    }

    /// Make `target` mirror version `id`
    ///
    /// Files tracked by the previously checked-out version but absent from
    /// `id` are removed; untracked files are left alone. Checking out into
    /// the working tree also records `id` as the checked-out version.
    pub fn checkout(&self, id: VersionId, target: &Path) -> Result<CheckoutSummary> {
        let lock = self.lock.write()?;
        let tracked = self.tracked_entries()?;
        self.checkout_locked(&lock, id, target, &tracked)
    }

    /// Switch to `name` and materialize its head in the working tree.
    /// Returns `None` when the branch has no versions yet.
    pub fn checkout_branch(&self, name: &str) -> Result<Option<CheckoutSummary>> {
        let lock = self.lock.write()?;
        let tracked = self.tracked_entries()?;
        self.branches.switch_branch(&lock, name)?;
        match self.branches.head(name)? {
            Some(head) => {
                let worktree = self.config.worktree.clone();
                self.checkout_locked(&lock, head, &worktree, &tracked).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Record a new version with the content of `id` on top of the current
    /// head, then check it out. Later history is kept.
    pub fn revert_to(&self, id: VersionId, message: Option<&str>) -> Result<VersionId> {
        let lock = self.lock.write()?;
        let target = self.graph.get_version(id)?;
        let branch = self.branches.current_branch()?;
        let head = self.branches.current_head()?;
        let message = message.map_or_else(|| format!("Revert to {}", id), str::to_string);
        // Taken before the head moves, so files of the old head get removed.
        let tracked = self.tracked_entries()?;

        let new = self.graph.create_version(
            &lock,
            Some(head),
            target.entries,
            &branch,
            self.clock.now(),
            Some(message),
        )?;
        self.branches.advance_head(&lock, &branch, new, &self.graph)?;

        let worktree = self.config.worktree.clone();
        self.checkout_locked(&lock, new, &worktree, &tracked)?;
        tracing::info!("Reverted '{}' to the content of {} as {}", branch, id, new);
        Ok(new)
    }

    /// Materialize `id` into `target`, removing the paths of `tracked` that
    /// `id` does not have
    fn checkout_locked(
        &self,
        lock: &WriteLock,
        id: VersionId,
        target: &Path,
        tracked: &BTreeMap<String, BlobHash>,
    ) -> Result<CheckoutSummary> {
        let version = self.graph.get_version(id)?;
        fs::create_dir_all(target)?;

        let summary = self.materialize(target, &version.entries, tracked)?;
        if same_dir(target, &self.config.worktree) {
            self.branches.set_checked_out(lock, Some(id))?;
        }

        tracing::info!(
            "Checked out {} into {:?} ({} written, {} removed, {} unchanged)",
            id,
            target,
            summary.written,
            summary.removed,
            summary.unchanged
        );
        Ok(summary)
    }

    fn materialize(
        &self,
        target: &Path,
        entries: &BTreeMap<String, BlobHash>,
        tracked: &BTreeMap<String, BlobHash>,
    ) -> Result<CheckoutSummary> {
        let stage_root = target.join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4().simple()));
        let staged_dir = stage_root.join("new");
        let backup_dir = stage_root.join("old");
        fs::create_dir_all(&staged_dir)?;
        fs::create_dir_all(&backup_dir)?;

        let result = self.stage_and_swap(target, &staged_dir, backup_dir, entries, tracked);
        let keep_stage = matches!(&result, Err((_, false)));
        if keep_stage {
            tracing::warn!("Checkout rollback incomplete; backups kept in {:?}", stage_root);
        } else if let Err(e) = fs::remove_dir_all(&stage_root) {
            tracing::warn!("Failed to remove staging directory {:?}: {}", stage_root, e);
        }
        result.map_err(|(e, _)| e)
    }

    /// On failure returns the error and whether the rollback was clean
    fn stage_and_swap(
        &self,
        target: &Path,
        staged_dir: &Path,
        backup_dir: PathBuf,
        entries: &BTreeMap<String, BlobHash>,
        tracked: &BTreeMap<String, BlobHash>,
    ) -> std::result::Result<CheckoutSummary, (Error, bool)> {
        let mut summary = CheckoutSummary::default();

        // Stage: nothing in the target is touched yet.
        let mut to_place = Vec::new();
        for (path, hash) in entries {
            let dest = target.join(path);
            let data = self.store.get(*hash).map_err(|e| (e, true))?;
            if dest.is_file() && fs::read(&dest).map_err(|e| (Error::from(e), true))? == data {
                summary.unchanged += 1;
                continue;
            }
            let staged = staged_dir.join(path);
            let written = staged
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::write(&staged, &data));
            if let Err(source) = written {
                return Err((Error::PartialWrite { path: dest, source }, true));
            }
            to_place.push((staged, dest));
        }

        let to_remove: Vec<PathBuf> = tracked
            .keys()
            .filter(|path| !entries.contains_key(*path))
            .map(|path| target.join(path))
            .filter(|dest| dest.is_file())
            .collect();

        // Swap
        let mut swap = Swap::new(target, backup_dir);
        let mut failed = None;
        for dest in &to_remove {
            if let Err(source) = swap.back_up(dest) {
                failed = Some((dest.clone(), source));
                break;
            }
            // A directory emptied here may be replaced by a file below.
            fsutil::prune_empty_parents(dest, target);
        }
        if failed.is_none() {
            for (staged, dest) in &to_place {
                if let Err(source) = swap.place(staged, dest) {
                    failed = Some((dest.clone(), source));
                    break;
                }
            }
        }
        if let Some((path, source)) = failed {
            tracing::warn!("Checkout failed at {:?}, rolling back", path);
            let clean = swap.rollback();
            return Err((Error::PartialWrite { path, source }, clean));
        }

        summary.written = to_place.len();
        summary.removed = to_remove.len();
        Ok(summary)
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
