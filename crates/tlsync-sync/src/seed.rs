use serde::Serialize;
use tlsync_core::countries::reference_countries;
use tlsync_core::{parse_legend, RevisionId, LEGEND_FILE_NAME};
use tlsync_snapshot::SnapshotRepository;
use tlsync_storage::UrlStore;
use tracing::{info, warn};

use crate::SyncError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub categories: u64,
    pub countries: u64,
}

/// Insert missing countries and the categories of the legend file at `revision`.
/// Existing reference rows are never modified.
pub async fn seed_reference_data(
    store: &dyn UrlStore,
    repo: &dyn SnapshotRepository,
    revision: &RevisionId,
    lists_dir: &str,
) -> Result<SeedReport, SyncError> {
    let countries = store.insert_countries(&reference_countries()).await?;

    let legend_path = format!("{}/{}", lists_dir.trim_end_matches('/'), LEGEND_FILE_NAME);
    let categories = match repo.read_file(revision, &legend_path).await? {
        Some(text) => {
            let legend =
                parse_legend(&text).map_err(|err| SyncError::decode(&legend_path, err))?;
            store.insert_categories(&legend).await?
        }
        None => {
            warn!(path = %legend_path, "legend file missing, categories not seeded");
            0
        }
    };

    info!(categories, countries, "reference data seeded");
    Ok(SeedReport {
        categories,
        countries,
    })
}

#[cfg(test)]
mod tests {
    use tlsync_snapshot::MemorySnapshotRepository;
    use tlsync_storage::MemoryStore;

    use super::*;
    use crate::testutil::{LEGEND, LEGEND_PATH};

    #[tokio::test]
    async fn seeds_countries_and_legend_once() {
        let store = MemoryStore::new();
        let repo = MemorySnapshotRepository::new();
        let rev = repo.commit([(LEGEND_PATH, LEGEND)]).await;

        let first = seed_reference_data(&store, &repo, &rev, "lists").await.unwrap();
        assert_eq!(first.categories, 3);
        assert_eq!(first.countries as usize, reference_countries().len());

        let second = seed_reference_data(&store, &repo, &rev, "lists/").await.unwrap();
        assert_eq!(second, SeedReport::default());

        let gambling = store
            .categories()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.code == "GMB")
            .unwrap();
        assert_eq!(gambling.old_codes, vec!["GAMB"]);
    }

    #[tokio::test]
    async fn existing_categories_are_not_rewritten() {
        let store = MemoryStore::new();
        let repo = MemorySnapshotRepository::new();
        let rev = repo.commit([(LEGEND_PATH, LEGEND)]).await;
        seed_reference_data(&store, &repo, &rev, "lists").await.unwrap();

        let renamed = LEGEND.replace("News Media", "Newspapers");
        let rev = repo.commit([(LEGEND_PATH, renamed)]).await;
        let report = seed_reference_data(&store, &repo, &rev, "lists").await.unwrap();
        assert_eq!(report.categories, 0);
        let news = store
            .categories()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.code == "NEWS")
            .unwrap();
        assert_eq!(news.description, "News Media");
    }

    #[tokio::test]
    async fn missing_legend_still_seeds_countries() {
        let store = MemoryStore::new();
        let repo = MemorySnapshotRepository::new();
        let rev = repo.commit([("lists/it.csv", "")]).await;
        let report = seed_reference_data(&store, &repo, &rev, "lists").await.unwrap();
        assert_eq!(report.categories, 0);
        assert!(report.countries > 0);
    }
}
