//! First import of every list file, used when no checkpoint exists yet.

use tlsync_core::{country_code_from_path, NewUrl, RevisionId, SnapshotRow};
use tlsync_snapshot::SnapshotRepository;
use tlsync_storage::UrlStore;
use tracing::{debug, info, warn};

use crate::reconcile::{country_id_for, FileOutcomes, FileReport};
use crate::rows::{prepare_rows, read_rows};
use crate::{LookupCache, SyncError};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub struct BulkLoader<'a> {
    store: &'a dyn UrlStore,
    lookup: &'a LookupCache,
    batch_size: usize,
}

impl<'a> BulkLoader<'a> {
    pub fn new(store: &'a dyn UrlStore, lookup: &'a LookupCache, batch_size: usize) -> Self {
        Self {
            store,
            lookup,
            batch_size: batch_size.max(1),
        }
    }

    /// Import every country file under `lists_dir` at `revision`.
    pub async fn load_all(
        &self,
        repo: &dyn SnapshotRepository,
        revision: &RevisionId,
        lists_dir: &str,
    ) -> Result<FileOutcomes, SyncError> {
        let files = repo.list_files(revision, lists_dir).await?;
        info!(files = files.len(), revision = %revision.short(), "bulk loading snapshot");

        let mut outcomes = FileOutcomes::default();
        for path in files {
            let Some(country_code) = country_code_from_path(&path) else {
                debug!(path = %path, "not a country file");
                continue;
            };
            let result = match read_rows(repo, revision, &path).await {
                Ok(rows) => self.load_file(&path, &country_code, &rows).await,
                Err(err) => Err(err),
            };
            outcomes.record(&path, result)?;
        }
        Ok(outcomes)
    }

    /// Insert the rows of one file in batches. Rows whose `(url, country)` already
    /// exists are left alone, so an interrupted bootstrap can be retried.
    pub async fn load_file(
        &self,
        path: &str,
        country_code: &str,
        rows: &[SnapshotRow],
    ) -> Result<Option<FileReport>, SyncError> {
        let Some(country_id) = country_id_for(self.lookup, country_code) else {
            warn!(path, country_code, "no known country for list file, skipping");
            return Ok(None);
        };
        let write_err = |err| SyncError::from_write(path, err);

        let prepared = prepare_rows(path, rows, self.lookup);
        let new_rows: Vec<NewUrl> = prepared
            .rows
            .iter()
            .map(|resolved| resolved.new_url(country_id))
            .collect();

        let mut report = FileReport::new(path, country_code);
        report.issues = prepared.issues;

        let mut tx = self.store.begin_country(country_id).await.map_err(write_err)?;
        for batch in new_rows.chunks(self.batch_size) {
            report.inserted += tx.insert_batch(batch).await.map_err(write_err)?;
        }
        tx.commit().await.map_err(write_err)?;

        report.unchanged = new_rows.len() as u64 - report.inserted;
        info!(
            path,
            country_code,
            inserted = report.inserted,
            already_present = report.unchanged,
            "bulk loaded list file"
        );
        Ok(Some(report))
    }
}
