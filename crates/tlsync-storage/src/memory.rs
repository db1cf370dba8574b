//! In-process store with the same transactional behaviour as the PostgreSQL
//! backend. Used by tests and for dry runs.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tlsync_core::{
    Category, Country, CountryId, NewCategory, NewCountry, NewUrl, RevisionId, SyncCheckpoint,
    UrlAttributes, UrlId, UrlRecord,
};
use tokio::sync::Mutex;

use crate::{CountryTx, Result, StoreError, UrlListing, UrlQuery, UrlStore};

#[derive(Debug, Default)]
struct MemoryState {
    categories: Vec<Category>,
    countries: Vec<Country>,
    urls: Vec<UrlRecord>,
    checkpoints: Vec<SyncCheckpoint>,
    next_url_id: UrlId,
    writes: u64,
    rejected_urls: HashSet<String>,
    unavailable: bool,
}

impl MemoryState {
    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn allocate_url_id(&mut self) -> UrlId {
        self.next_url_id += 1;
        self.next_url_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All URL rows in id order.
    pub async fn urls(&self) -> Vec<UrlRecord> {
        self.state.lock().await.urls.clone()
    }

    /// Number of row writes committed so far (inserts, updates, deactivations,
    /// reference rows and checkpoints).
    pub async fn write_count(&self) -> u64 {
        self.state.lock().await.writes
    }

    pub async fn checkpoints(&self) -> Vec<SyncCheckpoint> {
        self.state.lock().await.checkpoints.clone()
    }

    /// Make every write touching `url` fail, as a constraint violation would.
    pub async fn reject_writes_for(&self, url: impl Into<String>) {
        self.state.lock().await.rejected_urls.insert(url.into());
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Insert a row without the `(url, country)` uniqueness check, to reproduce
    /// stores that were populated before the constraint existed.
    pub async fn insert_unchecked(&self, row: NewUrl, active: bool) -> UrlId {
        let mut state = self.state.lock().await;
        let id = state.allocate_url_id();
        state.urls.push(UrlRecord {
            id,
            url: row.url,
            category_id: row.category_id,
            country_id: row.country_id,
            date_added: row.date_added,
            source: row.source,
            notes: row.notes,
            active,
        });
        state.writes += 1;
        id
    }
}

#[async_trait]
impl UrlStore for MemoryStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.categories.clone())
    }

    async fn countries(&self) -> Result<Vec<Country>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.countries.clone())
    }

    async fn insert_categories(&self, categories: &[NewCategory]) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let mut inserted = 0;
        for category in categories {
            if state.categories.iter().any(|c| c.code == category.code) {
                continue;
            }
            let id = state.categories.len() as i32 + 1;
            state.categories.push(Category {
                id,
                code: category.code.clone(),
                description: category.description.clone(),
                long_description: category.long_description.clone(),
                old_codes: category.old_codes.clone(),
            });
            inserted += 1;
        }
        state.writes += inserted;
        Ok(inserted)
    }

    async fn insert_countries(&self, countries: &[NewCountry]) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let mut inserted = 0;
        for country in countries {
            if state.countries.iter().any(|c| {
                c.alpha_2 == country.alpha_2
                    || c.alpha_3 == country.alpha_3
                    || c.full_name == country.full_name
                    || c.short_name == country.short_name
            }) {
                continue;
            }
            let id = state.countries.len() as i32 + 1;
            state.countries.push(Country {
                id,
                alpha_2: country.alpha_2.clone(),
                alpha_3: country.alpha_3.clone(),
                full_name: country.full_name.clone(),
                short_name: country.short_name.clone(),
            });
            inserted += 1;
        }
        state.writes += inserted;
        Ok(inserted)
    }

    async fn latest_checkpoint(&self) -> Result<Option<SyncCheckpoint>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.checkpoints.last().cloned())
    }

    async fn record_checkpoint(&self, revision: &RevisionId) -> Result<SyncCheckpoint> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.checkpoints.retain(|c| &c.revision != revision);
        let checkpoint = SyncCheckpoint {
            revision: revision.clone(),
            executed_at: Utc::now(),
        };
        state.checkpoints.push(checkpoint.clone());
        state.writes += 1;
        Ok(checkpoint)
    }

    async fn begin_country(&self, country_id: CountryId) -> Result<Box<dyn CountryTx>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        let urls = state
            .urls
            .iter()
            .filter(|u| u.country_id == country_id)
            .cloned()
            .collect();
        Ok(Box::new(MemoryCountryTx {
            shared: Arc::clone(&self.state),
            country_id,
            urls,
            rejected_urls: state.rejected_urls.clone(),
            writes: 0,
        }))
    }

    async fn active_urls(&self, query: &UrlQuery) -> Result<Vec<UrlListing>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        let mut listings = Vec::new();
        for url in state.urls.iter().filter(|u| u.active) {
            let Some(country) = state.countries.iter().find(|c| c.id == url.country_id) else {
                continue;
            };
            let Some(category) = state.categories.iter().find(|c| c.id == url.category_id) else {
                continue;
            };
            if !query.country_codes.contains(&country.alpha_2) {
                continue;
            }
            if !query.category_codes.is_empty() && !query.category_codes.contains(&category.code)
            {
                continue;
            }
            listings.push(UrlListing {
                url: url.url.clone(),
                category_code: category.code.clone(),
                country_code: country.alpha_2.clone(),
            });
        }
        if let Some(limit) = query.limit {
            listings.truncate(limit.max(0) as usize);
        }
        Ok(listings)
    }
}

/// Works on a private copy of one country's rows; commit swaps the copy in.
struct MemoryCountryTx {
    shared: Arc<Mutex<MemoryState>>,
    country_id: CountryId,
    urls: Vec<UrlRecord>,
    rejected_urls: HashSet<String>,
    writes: u64,
}

impl MemoryCountryTx {
    fn check_writable(&self, url: &str) -> Result<()> {
        if self.rejected_urls.contains(url) {
            return Err(StoreError::WriteRejected(url.to_string()));
        }
        Ok(())
    }

    fn check_country(&self, row: &NewUrl) -> Result<()> {
        if row.country_id != self.country_id {
            return Err(StoreError::Constraint(format!(
                "row for country {} written through transaction for country {}",
                row.country_id, self.country_id
            )));
        }
        Ok(())
    }

    async fn push_row(&mut self, row: &NewUrl) -> UrlId {
        let id = self.shared.lock().await.allocate_url_id();
        self.urls.push(UrlRecord {
            id,
            url: row.url.clone(),
            category_id: row.category_id,
            country_id: row.country_id,
            date_added: row.date_added,
            source: row.source.clone(),
            notes: row.notes.clone(),
            active: true,
        });
        self.writes += 1;
        id
    }
}

#[async_trait]
impl CountryTx for MemoryCountryTx {
    fn country_id(&self) -> CountryId {
        self.country_id
    }

    async fn load_urls(&mut self) -> Result<Vec<UrlRecord>> {
        Ok(self.urls.clone())
    }

    async fn deactivate(&mut self, ids: &[UrlId]) -> Result<u64> {
        let mut changed = 0;
        for id in ids {
            let Some(index) = self.urls.iter().position(|u| u.id == *id && u.active) else {
                continue;
            };
            self.check_writable(&self.urls[index].url)?;
            self.urls[index].active = false;
            changed += 1;
        }
        self.writes += changed;
        Ok(changed)
    }

    async fn insert_url(&mut self, row: &NewUrl) -> Result<UrlId> {
        self.check_country(row)?;
        self.check_writable(&row.url)?;
        if self.urls.iter().any(|u| u.url == row.url) {
            return Err(StoreError::Constraint(format!(
                "duplicate key (url, country_id) = ({}, {})",
                row.url, row.country_id
            )));
        }
        Ok(self.push_row(row).await)
    }

    async fn insert_batch(&mut self, rows: &[NewUrl]) -> Result<u64> {
        let mut inserted = 0;
        for row in rows {
            self.check_country(row)?;
            self.check_writable(&row.url)?;
            if self.urls.iter().any(|u| u.url == row.url) {
                continue;
            }
            self.push_row(row).await;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update_url(&mut self, id: UrlId, attributes: &UrlAttributes) -> Result<()> {
        let index = self
            .urls
            .iter()
            .position(|u| u.id == id)
            .ok_or(StoreError::UrlNotFound(id))?;
        self.check_writable(&self.urls[index].url)?;
        let record = &mut self.urls[index];
        record.category_id = attributes.category_id;
        record.source = attributes.source.clone();
        record.notes = attributes.notes.clone();
        record.active = attributes.active;
        self.writes += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            shared,
            country_id,
            urls,
            writes,
            ..
        } = *self;
        let mut state = shared.lock().await;
        state.ensure_available()?;
        state.urls.retain(|u| u.country_id != country_id);
        state.urls.extend(urls);
        state.urls.sort_by_key(|u| u.id);
        state.writes += writes;
        Ok(())
    }
}
