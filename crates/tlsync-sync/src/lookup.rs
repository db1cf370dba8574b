use std::collections::HashMap;

use tlsync_core::{Category, CategoryId, Country, CountryId};
use tlsync_storage::UrlStore;

use crate::SyncError;

/// Code-to-id maps for categories and countries, read once per run.
#[derive(Debug, Clone, Default)]
pub struct LookupCache {
    categories: HashMap<String, CategoryId>,
    countries: HashMap<String, CountryId>,
}

impl LookupCache {
    pub async fn load(store: &dyn UrlStore) -> Result<Self, SyncError> {
        let categories = store.categories().await?;
        let countries = store.countries().await?;
        Ok(Self::from_rows(&categories, &countries))
    }

    pub fn from_rows(categories: &[Category], countries: &[Country]) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|c| (c.code.clone(), c.id))
                .collect(),
            countries: countries
                .iter()
                .map(|c| (c.alpha_2.to_ascii_uppercase(), c.id))
                .collect(),
        }
    }

    pub fn resolve_category(&self, code: &str) -> Option<CategoryId> {
        self.categories.get(code.trim()).copied()
    }

    /// Case-insensitive on the alpha-2 code.
    pub fn resolve_country(&self, alpha_2: &str) -> Option<CountryId> {
        self.countries.get(&alpha_2.trim().to_ascii_uppercase()).copied()
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn country_count(&self) -> usize {
        self.countries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> LookupCache {
        LookupCache::from_rows(
            &[Category {
                id: 4,
                code: "NEWS".into(),
                description: "News Media".into(),
                long_description: None,
                old_codes: vec!["NEWSMEDIA".into()],
            }],
            &[Country {
                id: 9,
                alpha_2: "XX".into(),
                alpha_3: "XXX".into(),
                full_name: "Global".into(),
                short_name: "Global".into(),
            }],
        )
    }

    #[test]
    fn resolves_known_codes() {
        let cache = cache();
        assert_eq!(cache.resolve_category("NEWS"), Some(4));
        assert_eq!(cache.resolve_country("XX"), Some(9));
        assert_eq!(cache.resolve_country("xx"), Some(9));
    }

    #[test]
    fn unknown_and_superseded_codes_do_not_resolve() {
        let cache = cache();
        assert_eq!(cache.resolve_category("NEWSMEDIA"), None);
        assert_eq!(cache.resolve_category("news"), None);
        assert_eq!(cache.resolve_country("US"), None);
    }

    #[tokio::test]
    async fn loads_from_store() {
        let store = tlsync_storage::MemoryStore::new();
        store
            .insert_countries(&tlsync_core::countries::reference_countries())
            .await
            .unwrap();
        let cache = LookupCache::load(&store).await.unwrap();
        assert_eq!(cache.category_count(), 0);
        assert!(cache.resolve_country("IT").is_some());
        assert!(cache.resolve_country("EU").is_some());
    }
}
