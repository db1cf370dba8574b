use std::collections::BTreeSet;

use tlsync_core::{country_code_from_path, is_legend_path, is_list_path, RevisionId};
use tlsync_snapshot::SnapshotRepository;
use tracing::debug;

use crate::SyncError;

/// Changed paths between two revisions, sorted into what the run acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Per-country list files, including deleted ones.
    pub country_files: BTreeSet<String>,
    pub legend_changed: bool,
    /// Paths outside the lists directory or not naming a country.
    pub ignored: usize,
}

impl ChangeSet {
    pub fn from_paths<I>(paths: I, lists_dir: &str) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut changes = Self::default();
        for path in paths {
            if !is_list_path(&path, lists_dir) {
                changes.ignored += 1;
            } else if is_legend_path(&path) {
                changes.legend_changed = true;
            } else if country_code_from_path(&path).is_some() {
                changes.country_files.insert(path);
            } else {
                debug!(path = %path, "ignoring non-country list file");
                changes.ignored += 1;
            }
        }
        changes
    }
}

pub struct ChangeDetector<'a> {
    repo: &'a dyn SnapshotRepository,
    lists_dir: &'a str,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(repo: &'a dyn SnapshotRepository, lists_dir: &'a str) -> Self {
        Self { repo, lists_dir }
    }

    pub async fn changes(&self, from: &RevisionId, to: &RevisionId) -> Result<ChangeSet, SyncError> {
        let paths = self.repo.diff(from, to).await?;
        Ok(ChangeSet::from_paths(paths, self.lists_dir))
    }
}
