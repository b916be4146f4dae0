//! Error types for the version storage engine

use std::path::PathBuf;

use crate::hash::{BlobHash, VersionId};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing, reading or materializing versions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob not found: {0}")]
    BlobNotFound(BlobHash),

    #[error("Version not found: {0}")]
    VersionNotFound(VersionId),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Parent version {0} does not exist")]
    InvalidParent(VersionId),

    #[error("Refusing to create an empty root version")]
    EmptyVersion,

    #[error("Branch already exists: {0}")]
    DuplicateBranch(String),

    #[error("Version {new} does not descend from head {head} of branch '{branch}'")]
    NotAFastForward {
        branch: String,
        head: VersionId,
        new: VersionId,
    },

    #[error("Patch base mismatch: expected {expected}, got {actual}")]
    PatchMismatch { expected: BlobHash, actual: BlobHash },

    #[error("Failed to write {path:?}: {source}")]
    PartialWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No changes since {head} on branch '{branch}'")]
    NoChanges { branch: String, head: VersionId },

    #[error("Branch '{0}' has no versions yet")]
    NoVersionsYet(String),

    #[error("Branch '{0}' is checked out")]
    BranchCheckedOut(String),

    #[error("Invalid branch name: {0:?}")]
    InvalidBranchName(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Repository data corrupted: {0}")]
    Corrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Repository already initialized at {0:?}")]
    AlreadyInitialized(PathBuf),

    #[error("Not a repository: {0:?}")]
    NotARepository(PathBuf),
}

impl Error {
    /// True for the "nothing to do" outcome of a save, which callers may
    /// report as a notice instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoChanges { .. })
    }

    /// True for any of the lookup failures (blob, version or branch)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BlobNotFound(_) | Error::VersionNotFound(_) | Error::BranchNotFound(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_no_changes_is_recoverable() {
        let err = Error::NoChanges {
            branch: "trunk".into(),
            head: VersionId::new(3),
        };
        assert!(err.is_recoverable());
        assert!(!Error::EmptyVersion.is_recoverable());
        assert!(!Error::NoVersionsYet("trunk".into()).is_recoverable());
    }

    #[test]
    fn test_not_found_family() {
        assert!(Error::VersionNotFound(VersionId::new(1)).is_not_found());
        assert!(Error::BranchNotFound("x".into()).is_not_found());
        assert!(Error::BlobNotFound(BlobHash::from_data(b"x")).is_not_found());
        assert!(!Error::DuplicateBranch("x".into()).is_not_found());
    }
}
