//! Core domain model for the test-list synchronizer.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod countries;
pub mod csv;

pub use csv::{parse_country_rows, parse_legend, parse_records, CsvRecord};

pub const CRATE_NAME: &str = "tlsync-core";

/// Alpha-2 code used for the `global` list.
pub const GLOBAL_ALPHA_2: &str = "XX";

/// Legend file describing category codes, stored next to the country lists.
pub const LEGEND_FILE_NAME: &str = "00-LEGEND-new_category_codes.csv";

/// Number of columns in a per-country list row.
pub const COUNTRY_ROW_COLUMNS: usize = 6;

/// Number of columns in a legend row.
pub const LEGEND_ROW_COLUMNS: usize = 4;

pub type CategoryId = i32;
pub type CountryId = i32;
pub type UrlId = i64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("line {line}: expected {expected} columns, found {found}")]
    MalformedRow {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid date_added {value:?}")]
    InvalidDate { line: usize, value: String },
    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },
}

impl CoreError {
    pub fn line(&self) -> usize {
        match self {
            Self::MalformedRow { line, .. }
            | Self::InvalidDate { line, .. }
            | Self::UnterminatedQuote { line } => *line,
        }
    }
}

/// Opaque identifier of a snapshot revision (a commit hash for git-backed snapshots).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub code: String,
    pub description: String,
    pub long_description: Option<String>,
    pub old_codes: Vec<String>,
}

/// Category as read from the legend file, before it has an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub code: String,
    pub description: String,
    pub long_description: Option<String>,
    pub old_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub id: CountryId,
    pub alpha_2: String,
    pub alpha_3: String,
    pub full_name: String,
    pub short_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCountry {
    pub alpha_2: String,
    pub alpha_3: String,
    pub full_name: String,
    pub short_name: String,
}

/// Persisted URL row. Rows are never deleted; removal from a snapshot clears `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: UrlId,
    pub url: String,
    pub category_id: CategoryId,
    pub country_id: CountryId,
    pub date_added: NaiveDate,
    pub source: String,
    pub notes: String,
    pub active: bool,
}

impl UrlRecord {
    pub fn attributes(&self) -> UrlAttributes {
        UrlAttributes {
            category_id: self.category_id,
            source: self.source.clone(),
            notes: self.notes.clone(),
            active: self.active,
        }
    }
}

/// URL row about to be inserted; always inserted as active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUrl {
    pub url: String,
    pub category_id: CategoryId,
    pub country_id: CountryId,
    pub date_added: NaiveDate,
    pub source: String,
    pub notes: String,
}

impl NewUrl {
    pub fn attributes(&self) -> UrlAttributes {
        UrlAttributes {
            category_id: self.category_id,
            source: self.source.clone(),
            notes: self.notes.clone(),
            active: true,
        }
    }
}

/// The mutable subset of a URL row compared and rewritten during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlAttributes {
    pub category_id: CategoryId,
    pub source: String,
    pub notes: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub revision: RevisionId,
    pub executed_at: DateTime<Utc>,
}

/// One decoded data row of a per-country list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// 1-based line in the source file where the row starts.
    pub line: usize,
    pub url: String,
    pub category_code: String,
    pub date_added: NaiveDate,
    pub source: String,
    pub notes: String,
}

/// Derive the alpha-2 country code from a list file path.
///
/// The stem before `.csv` is upper-cased, `GLOBAL` becomes `XX`, and anything that
/// is not exactly two ASCII letters (the legend files, for instance) yields `None`.
pub fn country_code_from_path(path: &str) -> Option<String> {
    let file_name = path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path);
    let stem = strip_csv_suffix(file_name)?;
    let code = stem.to_ascii_uppercase();
    if code == "GLOBAL" {
        return Some(GLOBAL_ALPHA_2.to_string());
    }
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code)
    } else {
        None
    }
}

/// Whether `path` (repository-relative, `/`-separated) is a list file directly inside
/// `lists_dir`. Files in subdirectories are not lists.
pub fn is_list_path(path: &str, lists_dir: &str) -> bool {
    let dir = lists_dir.trim_end_matches('/');
    path.strip_prefix(dir)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| !rest.is_empty() && !rest.contains('/') && rest.ends_with(".csv"))
        .unwrap_or(false)
}

/// Whether `path` is the category legend file.
pub fn is_legend_path(path: &str) -> bool {
    path.rsplit('/').next() == Some(LEGEND_FILE_NAME)
}

fn strip_csv_suffix(file_name: &str) -> Option<&str> {
    let split = file_name.len().checked_sub(4)?;
    if !file_name.is_char_boundary(split) {
        return None;
    }
    let (stem, suffix) = file_name.split_at(split);
    suffix.eq_ignore_ascii_case(".csv").then_some(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn country_code_handles_case_and_global() {
        assert_eq!(country_code_from_path("lists/it.csv").as_deref(), Some("IT"));
        assert_eq!(country_code_from_path("lists/US.CSV").as_deref(), Some("US"));
        assert_eq!(country_code_from_path("lists/global.csv").as_deref(), Some("XX"));
        assert_eq!(country_code_from_path("GLOBAL.csv").as_deref(), Some("XX"));
    }

    #[test]
    fn non_country_files_are_rejected() {
        assert_eq!(country_code_from_path("lists/00-LEGEND-new_category_codes.csv"), None);
        assert_eq!(country_code_from_path("lists/usa.csv"), None);
        assert_eq!(country_code_from_path("lists/u1.csv"), None);
        assert_eq!(country_code_from_path("lists/README.md"), None);
        assert_eq!(country_code_from_path("lists/.csv"), None);
    }

    #[test]
    fn list_path_filter_requires_directory_and_suffix() {
        assert!(is_list_path("lists/it.csv", "lists"));
        assert!(is_list_path("lists/00-LEGEND-new_category_codes.csv", "lists/"));
        assert!(!is_list_path("README.md", "lists"));
        assert!(!is_list_path("lists/it.txt", "lists"));
        assert!(!is_list_path("listsx/it.csv", "lists"));
        assert!(!is_list_path("scripts/it.csv", "lists"));
        assert!(!is_list_path("lists/archive/us.csv", "lists"));
    }

    #[test]
    fn legend_path_is_detected() {
        assert!(is_legend_path("lists/00-LEGEND-new_category_codes.csv"));
        assert!(!is_legend_path("lists/it.csv"));
    }

    #[test]
    fn revision_short_form() {
        let rev = RevisionId::new("bee38ec1a956acf2b7b89ac5d3c1b629cd44b145");
        assert_eq!(rev.short(), "bee38ec1a956");
        assert_eq!(RevisionId::new("abc").short(), "abc");
    }

    #[test]
    fn new_url_attributes_are_active() {
        let row = NewUrl {
            url: "https://a.com/".into(),
            category_id: 3,
            country_id: 1,
            date_added: NaiveDate::from_ymd_opt(2017, 1, 2).unwrap(),
            source: "citizenlab".into(),
            notes: String::new(),
        };
        let attrs = row.attributes();
        assert!(attrs.active);
        assert_eq!(attrs.category_id, 3);
    }
}
