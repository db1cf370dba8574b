use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tlsync_core::RevisionId;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{Result, SnapshotError, SnapshotRepository, CHECKOUT_DIR_NAME};

/// Snapshot repository backed by a local git checkout, driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitSnapshotRepository {
    repo_url: String,
    checkout_dir: PathBuf,
}

impl GitSnapshotRepository {
    /// Checkout of `repo_url` kept at `<working_dir>/test-lists`.
    pub fn new(working_dir: impl AsRef<Path>, repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            checkout_dir: working_dir.as_ref().join(CHECKOUT_DIR_NAME),
        }
    }

    /// Use an existing checkout as-is.
    pub fn open(checkout_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: String::new(),
            checkout_dir: checkout_dir.into(),
        }
    }

    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    async fn is_prepared(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.checkout_dir.join(".git")).await?)
    }

    async fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        if !self.is_prepared().await? {
            return Err(SnapshotError::NotPrepared(self.checkout_dir.clone()));
        }
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.checkout_dir)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(SnapshotError::Git {
                command: args.join(" "),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl SnapshotRepository for GitSnapshotRepository {
    async fn prepare(&self) -> Result<()> {
        if self.is_prepared().await? {
            debug!(dir = %self.checkout_dir.display(), "checkout already present");
            return Ok(());
        }
        if self.repo_url.is_empty() {
            return Err(SnapshotError::NotPrepared(self.checkout_dir.clone()));
        }
        info!(url = %self.repo_url, dir = %self.checkout_dir.display(), "cloning snapshot repository");
        let output = Command::new("git")
            .arg("clone")
            .arg(&self.repo_url)
            .arg(&self.checkout_dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(SnapshotError::Git {
                command: format!("clone {}", self.repo_url),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn refresh_to_head(&self) -> Result<()> {
        info!(dir = %self.checkout_dir.display(), "pulling latest snapshot");
        self.git(&["pull", "--ff-only", "--quiet"]).await?;
        Ok(())
    }

    async fn current_revision(&self) -> Result<RevisionId> {
        let stdout = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(RevisionId::new(String::from_utf8_lossy(&stdout).trim()))
    }

    async fn diff(&self, from: &RevisionId, to: &RevisionId) -> Result<BTreeSet<String>> {
        let stdout = self
            .git(&[
                "diff",
                "--name-only",
                "--no-renames",
                "-z",
                from.as_str(),
                to.as_str(),
            ])
            .await?;
        Ok(split_nul(&stdout).collect())
    }

    async fn read_file(&self, revision: &RevisionId, path: &str) -> Result<Option<String>> {
        let listing = self
            .git(&["ls-tree", "--name-only", "-z", revision.as_str(), "--", path])
            .await?;
        if !split_nul(&listing).any(|entry| entry == path) {
            return Ok(None);
        }
        let spec = format!("{}:{}", revision.as_str(), path);
        let bytes = self.git(&["show", &spec]).await?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| SnapshotError::NonUtf8 {
                revision: revision.clone(),
                path: path.to_string(),
            })
    }

    async fn list_files(&self, revision: &RevisionId, dir: &str) -> Result<Vec<String>> {
        let dir = format!("{}/", dir.trim_end_matches('/'));
        let stdout = self
            .git(&["ls-tree", "--name-only", "-z", revision.as_str(), "--", &dir])
            .await?;
        Ok(split_nul(&stdout).collect())
    }
}

/// Split NUL-terminated `git -z` output into paths.
fn split_nul(bytes: &[u8]) -> impl Iterator<Item = String> + '_ {
    bytes
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| String::from_utf8_lossy(entry).into_owned())
}
