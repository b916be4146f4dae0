//! Working tree snapshots
//!
//! A [`Snapshot`] is the in-memory image of a working tree that `save`
//! ingests: normalized relative paths (always `/`-separated) mapped to file
//! bytes.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};
use crate::hash::BlobHash;

/// Prefix of the scratch directories a checkout creates inside its target
pub const STAGING_PREFIX: &str = ".vercont-stage-";

/// Normalize a relative path to the `a/b/c` form used as version keys
pub fn normalize_path(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => return Err(Error::InvalidPath(path.to_string())),
        }
    }
    if parts.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}

fn is_skipped_dir(entry: &DirEntry, exclude: &[PathBuf]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let staging = entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with(STAGING_PREFIX));
    if staging || exclude.iter().any(|p| p == entry.path()) {
        tracing::debug!("Skipping {:?}", entry.path());
        return true;
    }
    false
}

/// File contents of a working tree keyed by relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<String, Vec<u8>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let path = normalize_path(path)?;
        self.files.insert(path, data.into());
        Ok(())
    }

    /// Read every regular file below `root`. Directories listed in `exclude`
    /// and checkout scratch directories are skipped; symlinks are ignored.
    pub fn capture(root: &Path, exclude: &[PathBuf]) -> Result<Self> {
        let root = root.canonicalize()?;
        let exclude: Vec<PathBuf> = exclude
            .iter()
            .filter_map(|p| p.canonicalize().ok())
            .collect();

        let mut snapshot = Self::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e, &exclude));
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                tracing::debug!("Ignoring non-regular file {:?}", entry.path());
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&root)
                .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
            let key = rel
                .to_str()
                .ok_or_else(|| Error::InvalidPath(rel.display().to_string()))
                .and_then(normalize_path)?;
            snapshot.files.insert(key, fs::read(entry.path())?);
        }
        Ok(snapshot)
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, d)| (p.as_str(), d.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path -> content hash, without storing anything
    pub fn hashes(&self) -> BTreeMap<String, BlobHash> {
        self.files
            .iter()
            .map(|(p, d)| (p.clone(), BlobHash::from_data(d)))
            .collect()
    }
}
