//! Relational store access for the synchronizer: the store contract plus the
//! PostgreSQL and in-memory backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tlsync_core::{
    Category, Country, CountryId, NewCategory, NewCountry, NewUrl, RevisionId, SyncCheckpoint,
    UrlAttributes, UrlId, UrlRecord,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "tlsync-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("url row {0} does not exist")]
    UrlNotFound(UrlId),
    #[error("write rejected for {0}")]
    WriteRejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failure is tied to the data being written rather than to the
    /// store being reachable. Such failures only abort the current file.
    pub fn is_data_error(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                db.code().is_some_and(|code| is_data_sqlstate(&code))
            }
            Self::Constraint(_) | Self::UrlNotFound(_) | Self::WriteRejected(_) => true,
            Self::Database(_) | Self::Migrate(_) | Self::Unavailable(_) => false,
        }
    }
}

/// SQLSTATE classes 22 (data exception) and 23 (integrity constraint violation).
/// Everything else, connection and operator intervention classes included, is
/// treated as the store failing.
pub fn is_data_sqlstate(code: &str) -> bool {
    code.starts_with("22") || code.starts_with("23")
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Filter for [`UrlStore::active_urls`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlQuery {
    /// Alpha-2 codes; a URL matches when its country is any of them.
    pub country_codes: Vec<String>,
    /// Category codes; empty means every category.
    pub category_codes: Vec<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlListing {
    pub url: String,
    pub category_code: String,
    pub country_code: String,
}

/// Read/write access to the four synchronizer tables.
#[async_trait]
pub trait UrlStore: Send + Sync {
    async fn categories(&self) -> Result<Vec<Category>>;

    async fn countries(&self) -> Result<Vec<Country>>;

    /// Insert categories whose code is not present yet. Existing rows are left untouched.
    async fn insert_categories(&self, categories: &[NewCategory]) -> Result<u64>;

    /// Insert countries whose codes are not present yet.
    async fn insert_countries(&self, countries: &[NewCountry]) -> Result<u64>;

    async fn latest_checkpoint(&self) -> Result<Option<SyncCheckpoint>>;

    /// Record `revision` as the newest checkpoint.
    async fn record_checkpoint(&self, revision: &RevisionId) -> Result<SyncCheckpoint>;

    /// Open a transaction scoped to one country's URL rows.
    async fn begin_country(&self, country_id: CountryId) -> Result<Box<dyn CountryTx>>;

    async fn active_urls(&self, query: &UrlQuery) -> Result<Vec<UrlListing>>;
}

/// Transaction over the URL rows of a single country.
///
/// Nothing is visible to other readers until [`CountryTx::commit`]; dropping the
/// transaction discards every write made through it.
#[async_trait]
pub trait CountryTx: Send {
    fn country_id(&self) -> CountryId;

    /// Every row of the country, active or not, in id order.
    async fn load_urls(&mut self) -> Result<Vec<UrlRecord>>;

    /// Set `active = false` on the given rows; returns how many changed.
    async fn deactivate(&mut self, ids: &[UrlId]) -> Result<u64>;

    async fn insert_url(&mut self, row: &NewUrl) -> Result<UrlId>;

    /// Insert rows, skipping any whose `(url, country)` already exists.
    async fn insert_batch(&mut self, rows: &[NewUrl]) -> Result<u64>;

    async fn update_url(&mut self, id: UrlId, attributes: &UrlAttributes) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_data_and_integrity_sqlstates_are_data_errors() {
        assert!(is_data_sqlstate("23505"));
        assert!(is_data_sqlstate("22001"));
        assert!(!is_data_sqlstate("57P01"));
        assert!(!is_data_sqlstate("08006"));
        assert!(!is_data_sqlstate("40001"));
    }

    #[test]
    fn connectivity_failures_end_the_run() {
        assert!(!StoreError::Database(sqlx::Error::PoolTimedOut).is_data_error());
        assert!(!StoreError::Unavailable("down".into()).is_data_error());
        assert!(StoreError::Constraint("dup".into()).is_data_error());
    }
}
