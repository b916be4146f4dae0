//! Process-level repository locking
//!
//! The repository may be touched by several short-lived processes at once.
//! Mutations hold an exclusive `flock` on `<repo>/lock`; readers hold a shared
//! one. Component methods that mutate persisted state take a `&WriteLock`
//! argument so the exclusive lock is provably held for their duration.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[cfg(unix)]
type Held = nix::fcntl::Flock<File>;

#[cfg(not(unix))]
type Held = File;

/// Handle on the repository lock file
#[derive(Debug, Clone)]
pub struct RepoLock {
    path: PathBuf,
}

/// Exclusive lock guard; released when dropped
#[derive(Debug)]
pub struct WriteLock {
    _held: Held,
}

/// Shared lock guard; released when dropped
#[derive(Debug)]
pub struct ReadLock {
    _held: Held,
}

impl RepoLock {
    /// Lock file inside the given repository directory
    pub fn new(repo_dir: &Path) -> Self {
        Self {
            path: repo_dir.join("lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the exclusive lock is acquired
    pub fn write(&self) -> Result<WriteLock> {
        let held = acquire(&self.path, true)?;
        tracing::debug!("Acquired exclusive lock {:?}", self.path);
        Ok(WriteLock { _held: held })
    }

    /// Block until a shared lock is acquired
    pub fn read(&self) -> Result<ReadLock> {
        let held = acquire(&self.path, false)?;
        Ok(ReadLock { _held: held })
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

#[cfg(unix)]
fn acquire(path: &Path, exclusive: bool) -> Result<Held> {
    use nix::fcntl::{Flock, FlockArg};

    let file = open_lock_file(path)?;
    let arg = if exclusive {
        FlockArg::LockExclusive
    } else {
        FlockArg::LockShared
    };
    Flock::lock(file, arg).map_err(|(_, errno)| std::io::Error::from(errno).into())
}

#[cfg(not(unix))]
fn acquire(path: &Path, _exclusive: bool) -> Result<Held> {
    // No advisory locking available; single-process use only.
    open_lock_file(path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::fcntl::{Flock, FlockArg};
    use tempfile::TempDir;

    fn try_exclusive(path: &Path) -> bool {
        let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        Flock::lock(file, FlockArg::LockExclusiveNonblock).is_ok()
    }

    #[test]
    fn test_write_lock_excludes_others_until_dropped() {
        let tmp = TempDir::new().unwrap();
        let lock = RepoLock::new(tmp.path());

        let guard = lock.write().unwrap();
        assert!(!try_exclusive(lock.path()));
        drop(guard);
        assert!(try_exclusive(lock.path()));
    }

    #[test]
    fn test_shared_locks_coexist() {
        let tmp = TempDir::new().unwrap();
        let lock = RepoLock::new(tmp.path());

        let first = lock.read().unwrap();
        let second = lock.read().unwrap();
        assert!(!try_exclusive(lock.path()));
        drop(first);
        drop(second);
        assert!(try_exclusive(lock.path()));
    }
}
