use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tlsync_core::{CoreError, UrlId};
use tlsync_snapshot::SnapshotError;
use tlsync_storage::StoreError;

use crate::SyncRunSummary;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: CoreError,
    },
    #[error("{path}: write failed: {source}")]
    Write {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("a sync run is already in progress")]
    AlreadyRunning,
    #[error("{} file(s) failed, checkpoint not advanced: {}", .failures.len(), .failures.join("; "))]
    Incomplete {
        failures: Vec<String>,
        summary: Box<SyncRunSummary>,
    },
}

impl SyncError {
    /// Failures confined to one list file. The run carries on with the other files
    /// but does not advance the checkpoint.
    pub fn is_file_scoped(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Write { .. })
    }

    /// Classify a store failure raised while writing `path`.
    pub(crate) fn from_write(path: &str, err: StoreError) -> Self {
        if err.is_data_error() {
            Self::Write {
                path: path.to_string(),
                source: err,
            }
        } else {
            Self::Store(err)
        }
    }

    pub(crate) fn decode(path: &str, source: CoreError) -> Self {
        Self::Decode {
            path: path.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The row was not applied; processing continued.
    RecoverableRowSkip,
    /// Reported for an operator; nothing was skipped.
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    UnknownCategory { code: String },
    /// The same URL appears more than once in a list file; the last occurrence is kept.
    DuplicateListedUrl { url: String },
    /// The store holds several rows for one `(url, country)` pair.
    DuplicateStoredUrl { url: String, ids: Vec<UrlId> },
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCategory { code } => write!(f, "unknown category code {code:?}"),
            Self::DuplicateListedUrl { url } => write!(f, "{url} listed more than once"),
            Self::DuplicateStoredUrl { url, ids } => {
                write!(f, "{url} stored in several rows {ids:?}")
            }
        }
    }
}

/// Row-level outcome that does not stop the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub severity: Severity,
    pub path: String,
    /// Line in the list file, or 0 for issues found in the store.
    pub line: usize,
    #[serde(flatten)]
    pub kind: IssueKind,
}

impl RowIssue {
    pub fn is_skip(&self) -> bool {
        self.severity == Severity::RecoverableRowSkip
    }
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}:{}: {}", self.path, self.line, self.kind)
        } else {
            write!(f, "{}: {}", self.path, self.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_and_data_write_errors_are_file_scoped() {
        let decode = SyncError::decode("lists/it.csv", CoreError::UnterminatedQuote { line: 3 });
        assert!(decode.is_file_scoped());
        assert_eq!(decode.to_string(), "lists/it.csv: line 3: unterminated quoted field");

        let write = SyncError::from_write("lists/it.csv", StoreError::UrlNotFound(7));
        assert!(write.is_file_scoped());

        let outage = SyncError::from_write("lists/it.csv", StoreError::Unavailable("down".into()));
        assert!(!outage.is_file_scoped());
        assert!(matches!(outage, SyncError::Store(_)));
    }

    #[test]
    fn issues_render_with_location() {
        let issue = RowIssue {
            severity: Severity::RecoverableRowSkip,
            path: "lists/us.csv".into(),
            line: 4,
            kind: IssueKind::UnknownCategory { code: "NOPE".into() },
        };
        assert!(issue.is_skip());
        assert_eq!(issue.to_string(), "lists/us.csv:4: unknown category code \"NOPE\"");
    }
}
