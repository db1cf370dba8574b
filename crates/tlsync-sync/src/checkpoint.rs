use serde::Serialize;
use tlsync_core::RevisionId;
use tlsync_storage::UrlStore;
use tracing::info;

use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Written,
    /// The revision was already the stored checkpoint.
    Unchanged,
    /// A file failed; the previous checkpoint stays in place.
    Withheld,
}

/// Last fully synchronized revision.
pub struct CheckpointStore<'a> {
    store: &'a dyn UrlStore,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(store: &'a dyn UrlStore) -> Self {
        Self { store }
    }

    pub async fn read_last(&self) -> Result<Option<RevisionId>, SyncError> {
        Ok(self
            .store
            .latest_checkpoint()
            .await?
            .map(|checkpoint| checkpoint.revision))
    }

    pub async fn write(&self, revision: &RevisionId) -> Result<CheckpointStatus, SyncError> {
        if self.read_last().await?.as_ref() == Some(revision) {
            info!(revision = %revision.short(), "checkpoint already at revision");
            return Ok(CheckpointStatus::Unchanged);
        }
        let checkpoint = self.store.record_checkpoint(revision).await?;
        info!(
            revision = %revision.short(),
            executed_at = %checkpoint.executed_at,
            "checkpoint written"
        );
        Ok(CheckpointStatus::Written)
    }
}

#[cfg(test)]
mod tests {
    use tlsync_storage::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn empty_store_has_no_checkpoint() {
        let store = MemoryStore::new();
        assert_eq!(CheckpointStore::new(&store).read_last().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rewriting_the_same_revision_is_a_no_op() {
        let store = MemoryStore::new();
        let checkpoints = CheckpointStore::new(&store);
        let rev = RevisionId::new("bee38ec1");

        assert_eq!(checkpoints.write(&rev).await.unwrap(), CheckpointStatus::Written);
        let writes = store.write_count().await;
        assert_eq!(checkpoints.write(&rev).await.unwrap(), CheckpointStatus::Unchanged);
        assert_eq!(store.write_count().await, writes);
        assert_eq!(checkpoints.read_last().await.unwrap(), Some(rev));
    }

    #[tokio::test]
    async fn latest_write_wins() {
        let store = MemoryStore::new();
        let checkpoints = CheckpointStore::new(&store);
        checkpoints.write(&RevisionId::new("a")).await.unwrap();
        checkpoints.write(&RevisionId::new("b")).await.unwrap();
        assert_eq!(
            checkpoints.read_last().await.unwrap(),
            Some(RevisionId::new("b"))
        );
    }
}
