//! PostgreSQL backend.

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use tlsync_core::{
    Category, Country, CountryId, NewCategory, NewCountry, NewUrl, RevisionId, SyncCheckpoint,
    UrlAttributes, UrlId, UrlRecord,
};
use tracing::debug;

use crate::{CountryTx, Result, StoreError, UrlListing, UrlQuery, UrlStore};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Upper bound on rows per multi-row INSERT; keeps bind parameters well under
/// the protocol limit of 65535.
const MAX_ROWS_PER_STATEMENT: usize = 5_000;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

fn url_record(row: &PgRow) -> Result<UrlRecord> {
    Ok(UrlRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        category_id: row.try_get("category_id")?,
        country_id: row.try_get("country_id")?,
        date_added: row.try_get("date_added")?,
        source: row.try_get("source")?,
        notes: row.try_get("notes")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl UrlStore for PgStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, description, long_description, old_codes
              FROM url_categories
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Category {
                    id: row.try_get("id")?,
                    code: row.try_get("code")?,
                    description: row.try_get("description")?,
                    long_description: row.try_get("long_description")?,
                    old_codes: row.try_get("old_codes")?,
                })
            })
            .collect()
    }

    async fn countries(&self) -> Result<Vec<Country>> {
        let rows = sqlx::query(
            r#"
            SELECT id, alpha_2, alpha_3, full_name, short_name
              FROM countries
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Country {
                    id: row.try_get("id")?,
                    alpha_2: row.try_get("alpha_2")?,
                    alpha_3: row.try_get("alpha_3")?,
                    full_name: row.try_get("full_name")?,
                    short_name: row.try_get("short_name")?,
                })
            })
            .collect()
    }

    async fn insert_categories(&self, categories: &[NewCategory]) -> Result<u64> {
        if categories.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO url_categories (code, description, long_description, old_codes) ",
        );
        qb.push_values(categories.iter(), |mut b, category| {
            b.push_bind(&category.code)
                .push_bind(&category.description)
                .push_bind(&category.long_description)
                .push_bind(&category.old_codes);
        });
        qb.push(" ON CONFLICT (code) DO NOTHING");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert_countries(&self, countries: &[NewCountry]) -> Result<u64> {
        if countries.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO countries (alpha_2, alpha_3, full_name, short_name) ",
        );
        qb.push_values(countries.iter(), |mut b, country| {
            b.push_bind(&country.alpha_2)
                .push_bind(&country.alpha_3)
                .push_bind(&country.full_name)
                .push_bind(&country.short_name);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn latest_checkpoint(&self) -> Result<Option<SyncCheckpoint>> {
        let row = sqlx::query(
            r#"
            SELECT commit_hash, executed_at
              FROM sync_checkpoint
             ORDER BY executed_at DESC
             LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SyncCheckpoint {
                revision: RevisionId::new(row.try_get::<String, _>("commit_hash")?),
                executed_at: row.try_get("executed_at")?,
            })
        })
        .transpose()
    }

    async fn record_checkpoint(&self, revision: &RevisionId) -> Result<SyncCheckpoint> {
        // A revision seen before (e.g. after an upstream revert) becomes current again.
        let row = sqlx::query(
            r#"
            INSERT INTO sync_checkpoint (commit_hash, executed_at)
            VALUES ($1, NOW())
            ON CONFLICT (commit_hash) DO UPDATE SET executed_at = EXCLUDED.executed_at
            RETURNING commit_hash, executed_at
            "#,
        )
        .bind(revision.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(SyncCheckpoint {
            revision: RevisionId::new(row.try_get::<String, _>("commit_hash")?),
            executed_at: row.try_get("executed_at")?,
        })
    }

    async fn begin_country(&self, country_id: CountryId) -> Result<Box<dyn CountryTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCountryTx { tx, country_id }))
    }

    async fn active_urls(&self, query: &UrlQuery) -> Result<Vec<UrlListing>> {
        let rows = sqlx::query(
            r#"
            SELECT u.url, c.code AS category_code, k.alpha_2 AS country_code
              FROM urls u
              JOIN countries k ON u.country_id = k.id
              JOIN url_categories c ON u.category_id = c.id
             WHERE u.active
               AND k.alpha_2 = ANY($1)
               AND (cardinality($2::text[]) = 0 OR c.code = ANY($2))
             ORDER BY random()
             LIMIT $3
            "#,
        )
        .bind(&query.country_codes)
        .bind(&query.category_codes)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UrlListing {
                    url: row.try_get("url")?,
                    category_code: row.try_get("category_code")?,
                    country_code: row.try_get("country_code")?,
                })
            })
            .collect()
    }
}

pub struct PgCountryTx {
    tx: Transaction<'static, Postgres>,
    country_id: CountryId,
}

#[async_trait]
impl CountryTx for PgCountryTx {
    fn country_id(&self) -> CountryId {
        self.country_id
    }

    async fn load_urls(&mut self) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, category_id, country_id, date_added, source, notes, active
              FROM urls
             WHERE country_id = $1
             ORDER BY id
            "#,
        )
        .bind(self.country_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(url_record).collect()
    }

    async fn deactivate(&mut self, ids: &[UrlId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE urls
               SET active = FALSE
             WHERE id = ANY($1)
               AND country_id = $2
               AND active
            "#,
        )
        .bind(ids)
        .bind(self.country_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_url(&mut self, row: &NewUrl) -> Result<UrlId> {
        if row.country_id != self.country_id {
            return Err(StoreError::Constraint(format!(
                "row for country {} written through transaction for country {}",
                row.country_id, self.country_id
            )));
        }
        let id: UrlId = sqlx::query_scalar(
            r#"
            INSERT INTO urls (url, category_id, country_id, date_added, source, notes, active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            RETURNING id
            "#,
        )
        .bind(&row.url)
        .bind(row.category_id)
        .bind(row.country_id)
        .bind(row.date_added)
        .bind(&row.source)
        .bind(&row.notes)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_batch(&mut self, rows: &[NewUrl]) -> Result<u64> {
        if let Some(stray) = rows.iter().find(|row| row.country_id != self.country_id) {
            return Err(StoreError::Constraint(format!(
                "row for country {} written through transaction for country {}",
                stray.country_id, self.country_id
            )));
        }

        let mut inserted = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO urls (url, category_id, country_id, date_added, source, notes, active) ",
            );
            qb.push_values(chunk.iter(), |mut b, row| {
                b.push_bind(&row.url)
                    .push_bind(row.category_id)
                    .push_bind(row.country_id)
                    .push_bind(row.date_added)
                    .push_bind(&row.source)
                    .push_bind(&row.notes)
                    .push_bind(true);
            });
            qb.push(" ON CONFLICT (url, country_id) DO NOTHING");
            let result = qb.build().execute(&mut *self.tx).await?;
            inserted += result.rows_affected();
            debug!(
                country_id = self.country_id,
                rows = chunk.len(),
                inserted = result.rows_affected(),
                "bulk insert chunk"
            );
        }
        Ok(inserted)
    }

    async fn update_url(&mut self, id: UrlId, attributes: &UrlAttributes) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE urls
               SET category_id = $2,
                   source = $3,
                   notes = $4,
                   active = $5
             WHERE id = $1
               AND country_id = $6
            "#,
        )
        .bind(id)
        .bind(attributes.category_id)
        .bind(&attributes.source)
        .bind(&attributes.notes)
        .bind(attributes.active)
        .bind(self.country_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UrlNotFound(id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
