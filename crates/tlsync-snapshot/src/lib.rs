//! Access to the versioned collection of list files.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tlsync_core::RevisionId;

pub mod git;
pub mod memory;

pub use git::GitSnapshotRepository;
pub use memory::MemorySnapshotRepository;

pub const CRATE_NAME: &str = "tlsync-snapshot";

/// Directory name of the checkout inside the working directory.
pub const CHECKOUT_DIR_NAME: &str = "test-lists";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`git {command}` exited with {status:?}: {stderr}")]
    Git {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("no checkout at {0}")]
    NotPrepared(PathBuf),
    #[error("{path} at {revision} is not valid UTF-8")]
    NonUtf8 { revision: RevisionId, path: String },
    #[error("unknown revision {0}")]
    UnknownRevision(RevisionId),
    #[error("snapshot repository unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;

/// Revision-addressed view over the list files.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Make the repository locally available (clone on first use).
    async fn prepare(&self) -> Result<()>;

    async fn refresh_to_head(&self) -> Result<()>;

    async fn current_revision(&self) -> Result<RevisionId>;

    /// Paths added, modified or removed between two revisions.
    async fn diff(&self, from: &RevisionId, to: &RevisionId) -> Result<BTreeSet<String>>;

    /// File content at `revision`, or `None` when the path does not exist there.
    async fn read_file(&self, revision: &RevisionId, path: &str) -> Result<Option<String>>;

    /// Files directly inside `dir` at `revision`, as repository-relative paths.
    async fn list_files(&self, revision: &RevisionId, dir: &str) -> Result<Vec<String>>;
}
