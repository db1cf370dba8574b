//! Incremental merge of one country's list into its stored rows.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tlsync_core::{CountryId, SnapshotRow, UrlId, UrlRecord};
use tlsync_storage::UrlStore;
use tracing::{debug, error, info, warn};

use crate::rows::prepare_rows;
use crate::{IssueKind, LookupCache, RowIssue, Severity, SyncError};

/// What applying one list file did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: String,
    pub country_code: String,
    pub inserted: u64,
    pub updated: u64,
    pub deactivated: u64,
    pub unchanged: u64,
    pub issues: Vec<RowIssue>,
}

impl FileReport {
    pub(crate) fn new(path: &str, country_code: &str) -> Self {
        Self {
            path: path.to_string(),
            country_code: country_code.to_string(),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> u64 {
        self.inserted + self.updated + self.deactivated
    }
}

/// Per-file results of a run. File-scoped failures are collected; any other error
/// ends the run.
#[derive(Debug, Default)]
pub struct FileOutcomes {
    pub reports: Vec<FileReport>,
    pub failures: Vec<SyncError>,
}

impl FileOutcomes {
    pub fn record(
        &mut self,
        path: &str,
        result: Result<Option<FileReport>, SyncError>,
    ) -> Result<(), SyncError> {
        match result {
            Ok(Some(report)) => self.reports.push(report),
            Ok(None) => {}
            Err(err) if err.is_file_scoped() => {
                error!(path, error = %err, "list file failed, changes for it were rolled back");
                self.failures.push(err);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

/// Resolve a two-letter code against the lookup; anything else is not a country file.
pub(crate) fn country_id_for(lookup: &LookupCache, country_code: &str) -> Option<CountryId> {
    if country_code.len() != 2 || !country_code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    lookup.resolve_country(country_code)
}

pub struct Reconciler<'a> {
    store: &'a dyn UrlStore,
    lookup: &'a LookupCache,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn UrlStore, lookup: &'a LookupCache) -> Self {
        Self { store, lookup }
    }

    /// Bring the stored rows of `country_code` in line with `rows` inside one
    /// transaction. Returns `None` when the code names no known country.
    pub async fn reconcile(
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
        let mut report = FileReport::new(path, country_code);
        report.issues = prepared.issues;

        let mut tx = self.store.begin_country(country_id).await.map_err(write_err)?;
        let existing = tx.load_urls().await.map_err(write_err)?;

        let mut by_url: HashMap<&str, &UrlRecord> = HashMap::with_capacity(existing.len());
        let mut duplicates: BTreeMap<&str, Vec<UrlId>> = BTreeMap::new();
        for record in &existing {
            match by_url.get(record.url.as_str()) {
                Some(first) => duplicates
                    .entry(record.url.as_str())
                    .or_insert_with(|| vec![first.id])
                    .push(record.id),
                None => {
                    by_url.insert(record.url.as_str(), record);
                }
            }
        }
        for (url, ids) in duplicates {
            warn!(path, url, ?ids, "several stored rows for one url, using the first");
            report.issues.push(RowIssue {
                severity: Severity::Warning,
                path: path.to_string(),
                line: 0,
                kind: IssueKind::DuplicateStoredUrl {
                    url: url.to_string(),
                    ids,
                },
            });
        }

        let stale: Vec<UrlId> = existing
            .iter()
            .filter(|record| record.active && !prepared.listed_urls.contains(record.url.as_str()))
            .map(|record| record.id)
            .collect();
        if !stale.is_empty() {
            report.deactivated = tx.deactivate(&stale).await.map_err(write_err)?;
        }

        for resolved in &prepared.rows {
            let wanted = resolved.attributes();
            match by_url.get(resolved.row.url.as_str()) {
                None => {
                    tx.insert_url(&resolved.new_url(country_id))
                        .await
                        .map_err(write_err)?;
                    report.inserted += 1;
                }
                Some(record) if record.attributes() == wanted => {
                    debug!(url = %record.url, "row unchanged");
                    report.unchanged += 1;
                }
                Some(record) => {
                    tx.update_url(record.id, &wanted).await.map_err(write_err)?;
                    report.updated += 1;
                }
            }
        }

        tx.commit().await.map_err(write_err)?;
        info!(
            path,
            country_code,
            inserted = report.inserted,
            updated = report.updated,
            deactivated = report.deactivated,
            unchanged = report.unchanged,
            "reconciled list file"
        );
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use tlsync_core::{SnapshotRow, UrlRecord};
    use tlsync_storage::{MemoryStore, StoreError};

    use super::*;
    use crate::testutil::{date, row, seeded_store, url_row};

    async fn reconcile(store: &MemoryStore, code: &str, rows: &[SnapshotRow]) -> FileReport {
        let lookup = LookupCache::load(store).await.unwrap();
        Reconciler::new(store, &lookup)
            .reconcile(&format!("lists/{}.csv", code.to_lowercase()), code, rows)
            .await
            .unwrap()
            .unwrap()
    }

    fn find<'r>(urls: &'r [UrlRecord], url: &str) -> Vec<&'r UrlRecord> {
        urls.iter().filter(|u| u.url == url).collect()
    }

    #[tokio::test]
    async fn removed_url_is_deactivated_and_new_url_inserted() {
        let (store, ids) = seeded_store().await;
        store
            .insert_unchecked(url_row("a.com", ids.news, ids.us), true)
            .await;

        let report = reconcile(&store, "US", &[row(2, "b.com", "HUMR")]).await;
        assert_eq!((report.inserted, report.deactivated, report.updated), (1, 1, 0));

        let urls = store.urls().await;
        let a = find(&urls, "a.com");
        assert_eq!(a.len(), 1);
        assert!(!a[0].active);
        assert_eq!(a[0].category_id, ids.news);
        let b = find(&urls, "b.com");
        assert_eq!(b.len(), 1);
        assert!(b[0].active);
        assert_eq!(b[0].category_id, ids.humr);
        assert_eq!(b[0].country_id, ids.us);
    }

    #[tokio::test]
    async fn second_pass_over_same_rows_writes_nothing() {
        let (store, _) = seeded_store().await;
        let rows = [row(2, "a.com", "NEWS"), row(3, "b.com", "HUMR")];
        reconcile(&store, "US", &rows).await;
        let state = store.urls().await;
        let writes = store.write_count().await;

        let report = reconcile(&store, "US", &rows).await;
        assert_eq!(report.writes(), 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(store.write_count().await, writes);
        assert_eq!(store.urls().await, state);
    }

    #[tokio::test]
    async fn reappearing_url_is_reactivated_in_place() {
        let (store, ids) = seeded_store().await;
        let id = store
            .insert_unchecked(url_row("a.com", ids.news, ids.us), false)
            .await;

        let mut changed = row(2, "a.com", "HUMR");
        changed.source = "citizenlab".into();
        let report = reconcile(&store, "US", &[changed]).await;
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);

        let urls = store.urls().await;
        let a = find(&urls, "a.com");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, id);
        assert!(a[0].active);
        assert_eq!(a[0].category_id, ids.humr);
        assert_eq!(a[0].source, "citizenlab");
        assert_eq!(a[0].date_added, date());
    }

    #[tokio::test]
    async fn changed_notes_update_the_row() {
        let (store, _) = seeded_store().await;
        reconcile(&store, "US", &[row(2, "a.com", "NEWS")]).await;
        let mut edited = row(2, "a.com", "NEWS");
        edited.notes = "blocked since 2019".into();
        let report = reconcile(&store, "US", &[edited]).await;
        assert_eq!(report.updated, 1);
        assert_eq!(store.urls().await[0].notes, "blocked since 2019");
    }

    #[tokio::test]
    async fn unknown_category_skips_only_that_row() {
        let (store, _) = seeded_store().await;
        let report = reconcile(
            &store,
            "US",
            &[row(2, "a.com", "NOPE"), row(3, "b.com", "NEWS")],
        )
        .await;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].is_skip());
        assert_eq!(report.issues[0].line, 2);
        assert_eq!(store.urls().await.len(), 1);
    }

    #[tokio::test]
    async fn valid_row_survives_a_later_unresolvable_duplicate() {
        let (store, ids) = seeded_store().await;
        let report = reconcile(
            &store,
            "US",
            &[row(2, "a.com", "NEWS"), row(3, "a.com", "NOPE")],
        )
        .await;
        assert_eq!(report.inserted, 1);
        let urls = store.urls().await;
        let a = find(&urls, "a.com");
        assert_eq!(a.len(), 1);
        assert!(a[0].active);
        assert_eq!(a[0].category_id, ids.news);
    }

    #[tokio::test]
    async fn other_countries_are_untouched() {
        let (store, ids) = seeded_store().await;
        store
            .insert_unchecked(url_row("a.com", ids.news, ids.global), true)
            .await;
        reconcile(&store, "US", &[]).await;
        assert!(store.urls().await[0].active);
    }

    #[tokio::test]
    async fn duplicate_stored_rows_are_reported_not_merged() {
        let (store, ids) = seeded_store().await;
        let first = store
            .insert_unchecked(url_row("a.com", ids.news, ids.us), true)
            .await;
        let second = store
            .insert_unchecked(url_row("a.com", ids.news, ids.us), true)
            .await;

        let report = reconcile(&store, "US", &[row(2, "a.com", "NEWS")]).await;
        assert_eq!(report.writes(), 0);
        assert_eq!(
            report.issues,
            vec![RowIssue {
                severity: Severity::Warning,
                path: "lists/us.csv".into(),
                line: 0,
                kind: IssueKind::DuplicateStoredUrl {
                    url: "a.com".into(),
                    ids: vec![first, second],
                },
            }]
        );
        assert_eq!(store.urls().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_the_whole_file() {
        let (store, ids) = seeded_store().await;
        store
            .insert_unchecked(url_row("old.com", ids.news, ids.us), true)
            .await;
        store.reject_writes_for("bad.com").await;
        let before = store.urls().await;

        let lookup = LookupCache::load(&store).await.unwrap();
        let err = Reconciler::new(&store, &lookup)
            .reconcile(
                "lists/us.csv",
                "US",
                &[row(2, "good.com", "NEWS"), row(3, "bad.com", "NEWS")],
            )
            .await
            .unwrap_err();
        assert!(err.is_file_scoped());
        assert!(matches!(
            err,
            SyncError::Write {
                source: StoreError::WriteRejected(_),
                ..
            }
        ));
        assert_eq!(store.urls().await, before);
    }

    #[tokio::test]
    async fn unknown_country_code_is_a_no_op() {
        let (store, _) = seeded_store().await;
        let lookup = LookupCache::load(&store).await.unwrap();
        let reconciler = Reconciler::new(&store, &lookup);
        for code in ["QQ", "USA", "1A"] {
            let outcome = reconciler
                .reconcile("lists/x.csv", code, &[row(2, "a.com", "NEWS")])
                .await
                .unwrap();
            assert!(outcome.is_none());
        }
        assert!(store.urls().await.is_empty());
    }
}
