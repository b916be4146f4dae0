//! Vercont Core Library
//!
//! Local single-user version control for one working tree:
//! - Content-addressed blob store with delta compression
//! - Line-level diff and patch engine
//! - Append-only version graph (a forest of linear chains)
//! - Named branches with fast-forward-only heads
//! - Atomic checkout and forward-only revert
//! - Process-level locking for short-lived concurrent invocations

pub mod branch;
pub mod checkout;
pub mod clock;
pub mod codec;
pub mod config;
pub mod diff;
pub mod error;
pub mod graph;
pub mod hash;
pub mod lock;
pub mod repository;
pub mod store;
pub mod worktree;

mod fsutil;

pub use branch::{BranchInfo, BranchManager};
pub use checkout::CheckoutSummary;
pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::{Codec, CodecKind};
pub use config::{RepositoryConfig, StoreConfig};
pub use diff::{Patch, PatchOp};
pub use error::{Error, Result};
pub use graph::{Change, ChangeKind, History, PathChange, Version, VersionGraph};
pub use hash::{BlobHash, VersionId};
pub use lock::{ReadLock, RepoLock, WriteLock};
pub use repository::{Repository, RepositoryStats};
pub use store::{ContentStore, StoreStats};
pub use worktree::Snapshot;
