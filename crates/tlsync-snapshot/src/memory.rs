//! In-memory snapshot history, addressed by content-derived revision ids.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tlsync_core::RevisionId;
use tokio::sync::Mutex;

use crate::{Result, SnapshotError, SnapshotRepository};

type Tree = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct History {
    commits: Vec<(RevisionId, Tree)>,
    unavailable: bool,
}

impl History {
    fn tree(&self, revision: &RevisionId) -> Result<&Tree> {
        self.commits
            .iter()
            .find(|(id, _)| id == revision)
            .map(|(_, tree)| tree)
            .ok_or_else(|| SnapshotError::UnknownRevision(revision.clone()))
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(SnapshotError::Unavailable("memory repository switched off".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySnapshotRepository {
    history: Mutex<History>,
}

impl MemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new head whose tree is exactly `files` (path to content).
    pub async fn commit<I, P, C>(&self, files: I) -> RevisionId
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let tree: Tree = files
            .into_iter()
            .map(|(path, content)| (path.into(), content.into()))
            .collect();
        let mut history = self.history.lock().await;
        let mut hasher = Sha256::new();
        if let Some((parent, _)) = history.commits.last() {
            hasher.update(parent.as_str().as_bytes());
        }
        for (path, content) in &tree {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update(content.as_bytes());
            hasher.update([0]);
        }
        let revision = RevisionId::new(hex::encode(hasher.finalize()));
        history.commits.push((revision.clone(), tree));
        revision
    }

    /// New head derived from the current one with some files replaced or removed
    /// (`None` content deletes the path).
    pub async fn amend<I, P>(&self, changes: I) -> RevisionId
    where
        I: IntoIterator<Item = (P, Option<String>)>,
        P: Into<String>,
    {
        let mut tree = {
            let history = self.history.lock().await;
            history
                .commits
                .last()
                .map(|(_, tree)| tree.clone())
                .unwrap_or_default()
        };
        for (path, content) in changes {
            let path: String = path.into();
            match content {
                Some(content) => tree.insert(path, content),
                None => tree.remove(&path),
            };
        }
        self.commit(tree).await
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.history.lock().await.unavailable = unavailable;
    }
}

#[async_trait]
impl SnapshotRepository for MemorySnapshotRepository {
    async fn prepare(&self) -> Result<()> {
        self.history.lock().await.ensure_available()
    }

    async fn refresh_to_head(&self) -> Result<()> {
        self.history.lock().await.ensure_available()
    }

    async fn current_revision(&self) -> Result<RevisionId> {
        let history = self.history.lock().await;
        history.ensure_available()?;
        history
            .commits
            .last()
            .map(|(id, _)| id.clone())
            .ok_or_else(|| SnapshotError::Unavailable("repository has no commits".into()))
    }

    async fn diff(&self, from: &RevisionId, to: &RevisionId) -> Result<BTreeSet<String>> {
        let history = self.history.lock().await;
        history.ensure_available()?;
        let old = history.tree(from)?;
        let new = history.tree(to)?;
        Ok(old
            .keys()
            .chain(new.keys())
            .filter(|path| old.get(*path) != new.get(*path))
            .cloned()
            .collect())
    }

    async fn read_file(&self, revision: &RevisionId, path: &str) -> Result<Option<String>> {
        let history = self.history.lock().await;
        history.ensure_available()?;
        Ok(history.tree(revision)?.get(path).cloned())
    }

    async fn list_files(&self, revision: &RevisionId, dir: &str) -> Result<Vec<String>> {
        let history = self.history.lock().await;
        history.ensure_available()?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(history
            .tree(revision)?
            .keys()
            .filter(|path| {
                path.strip_prefix(&prefix)
                    .map(|rest| !rest.is_empty() && !rest.contains('/'))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
