use std::collections::{HashMap, HashSet};

use tlsync_core::{
    parse_country_rows, CategoryId, CountryId, NewUrl, RevisionId, SnapshotRow, UrlAttributes,
};
use tlsync_snapshot::SnapshotRepository;
use tracing::warn;

use crate::{IssueKind, LookupCache, RowIssue, Severity, SyncError};

/// Rows of a list file at `revision`. A file missing at that revision reads as empty.
pub async fn read_rows(
    repo: &dyn SnapshotRepository,
    revision: &RevisionId,
    path: &str,
) -> Result<Vec<SnapshotRow>, SyncError> {
    match repo.read_file(revision, path).await? {
        Some(text) => parse_country_rows(&text).map_err(|err| SyncError::decode(path, err)),
        None => Ok(Vec::new()),
    }
}

pub(crate) struct ResolvedRow<'r> {
    pub row: &'r SnapshotRow,
    pub category_id: CategoryId,
}

impl ResolvedRow<'_> {
    pub fn attributes(&self) -> UrlAttributes {
        UrlAttributes {
            category_id: self.category_id,
            source: self.row.source.clone(),
            notes: self.row.notes.clone(),
            active: true,
        }
    }

    pub fn new_url(&self, country_id: CountryId) -> NewUrl {
        NewUrl {
            url: self.row.url.clone(),
            category_id: self.category_id,
            country_id,
            date_added: self.row.date_added,
            source: self.row.source.clone(),
            notes: self.row.notes.clone(),
        }
    }
}

pub(crate) struct PreparedRows<'r> {
    /// Rows to apply, at most one per URL.
    pub rows: Vec<ResolvedRow<'r>>,
    /// Every URL the file lists, including rows skipped for unknown codes.
    pub listed_urls: HashSet<&'r str>,
    pub issues: Vec<RowIssue>,
}

/// Resolve category codes, then keep the last resolvable row of each URL.
pub(crate) fn prepare_rows<'r>(
    path: &str,
    rows: &'r [SnapshotRow],
    lookup: &LookupCache,
) -> PreparedRows<'r> {
    let mut prepared = PreparedRows {
        rows: Vec::with_capacity(rows.len()),
        listed_urls: rows.iter().map(|row| row.url.as_str()).collect(),
        issues: Vec::new(),
    };

    let mut resolved = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(category_id) = lookup.resolve_category(&row.category_code) else {
            warn!(path, line = row.line, code = %row.category_code, "unknown category code, skipping row");
            prepared.issues.push(RowIssue {
                severity: Severity::RecoverableRowSkip,
                path: path.to_string(),
                line: row.line,
                kind: IssueKind::UnknownCategory {
                    code: row.category_code.clone(),
                },
            });
            continue;
        };
        resolved.push(ResolvedRow { row, category_id });
    }

    let last_seen: HashMap<&str, usize> = resolved
        .iter()
        .enumerate()
        .map(|(idx, resolved)| (resolved.row.url.as_str(), idx))
        .collect();

    for (idx, resolved) in resolved.into_iter().enumerate() {
        let row = resolved.row;
        if last_seen.get(row.url.as_str()) != Some(&idx) {
            warn!(path, line = row.line, url = %row.url, "url listed again later in the file, keeping the later row");
            prepared.issues.push(RowIssue {
                severity: Severity::Warning,
                path: path.to_string(),
                line: row.line,
                kind: IssueKind::DuplicateListedUrl {
                    url: row.url.clone(),
                },
            });
            continue;
        }
        prepared.rows.push(resolved);
    }
    prepared.issues.sort_by_key(|issue| issue.line);
    prepared
}
