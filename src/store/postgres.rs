use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use super::{ListFilter, RunRecord, Store, StoreStats};
use crate::config::UpdatePolicy;
use crate::loader::{merge, new_row, LoadOutcome};
use crate::metrics::RunSummary;
use crate::models::{DedupKey, NewRestaurant, Restaurant};

const COLUMNS: &str = "id, name, address, city, state, zip_code, certifying_agency,
    kosher_category, is_cholov_yisroel, is_pas_yisroel, listing_type, status,
    hours_of_operation, price_range, short_description, phone_number, website,
    certificate_link, google_listing_url, latitude, longitude, source_url,
    created_at, updated_at";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS restaurants (
        id                 BIGSERIAL PRIMARY KEY,
        dedup_key          TEXT UNIQUE NOT NULL,
        name               TEXT NOT NULL,
        address            TEXT NOT NULL,
        city               TEXT NOT NULL,
        state              TEXT NOT NULL,
        zip_code           TEXT,
        certifying_agency  TEXT NOT NULL,
        kosher_category    TEXT NOT NULL
            CHECK(kosher_category IN ('meat','dairy','pareve','fish','unknown')),
        is_cholov_yisroel  BOOLEAN,
        is_pas_yisroel     BOOLEAN NOT NULL DEFAULT FALSE,
        listing_type       TEXT,
        status             TEXT NOT NULL DEFAULT 'active'
            CHECK(status IN ('active','pending_approval','approved','inactive')),
        hours_of_operation TEXT,
        price_range        TEXT,
        short_description  TEXT,
        phone_number       TEXT,
        website            TEXT,
        certificate_link   TEXT,
        google_listing_url TEXT,
        latitude           DOUBLE PRECISION,
        longitude          DOUBLE PRECISION,
        source_url         TEXT,
        created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
        CHECK(is_cholov_yisroel IS NULL OR kosher_category = 'dairy')
    )",
    "CREATE INDEX IF NOT EXISTS idx_restaurants_category ON restaurants(kosher_category)",
    "CREATE INDEX IF NOT EXISTS idx_restaurants_city ON restaurants(city)",
    "CREATE INDEX IF NOT EXISTS idx_restaurants_status ON restaurants(status)",
    "CREATE TABLE IF NOT EXISTS scrape_runs (
        run_id           TEXT PRIMARY KEY,
        started_at       TIMESTAMPTZ NOT NULL,
        finished_at      TIMESTAMPTZ NOT NULL,
        pages_fetched    BIGINT NOT NULL,
        pages_failed     BIGINT NOT NULL,
        listings         BIGINT NOT NULL,
        classified       BIGINT NOT NULL,
        unknown_category BIGINT NOT NULL,
        inserted         BIGINT NOT NULL,
        updated          BIGINT NOT NULL,
        unchanged        BIGINT NOT NULL,
        failed           BIGINT NOT NULL,
        aborted          BOOLEAN NOT NULL DEFAULT FALSE
    )",
];

/// Hosted store. A single pooled connection; the pipeline is sequential.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(PgStore { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn init_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(*stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Restaurant>> {
        let sql = format!("SELECT {} FROM restaurants WHERE dedup_key = $1", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(restaurant_from_row).transpose()
    }

    async fn upsert(&self, key: &DedupKey, rec: &NewRestaurant, policy: UpdatePolicy) -> Result<LoadOutcome> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {} FROM restaurants WHERE dedup_key = $1 FOR UPDATE",
            COLUMNS
        );
        let existing = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(restaurant_from_row)
            .transpose()?;

        let outcome = match existing {
            None => {
                insert(&mut tx, key, &new_row(rec)).await.context("insert restaurant")?;
                LoadOutcome::Inserted
            }
            Some(existing) => match merge(&existing, rec, policy) {
                Some(row) => {
                    update(&mut tx, &row).await.context("update restaurant")?;
                    LoadOutcome::Updated
                }
                None => LoadOutcome::Unchanged,
            },
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn deactivate(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("UPDATE restaurants SET status = 'inactive', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Restaurant>> {
        let sql = format!(
            "SELECT {} FROM restaurants
             WHERE ($1::TEXT IS NULL OR kosher_category = $1)
               AND ($2::TEXT IS NULL OR lower(city) = lower($2))
               AND ($3::TEXT IS NULL OR status = $3)
             ORDER BY city, name
             LIMIT $4",
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.category.map(|c| c.as_str()))
            .bind(filter.city.as_deref())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(restaurant_from_row).collect()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let counts = sqlx::query(
            "SELECT COUNT(*),
                    COUNT(*) FILTER (WHERE is_cholov_yisroel),
                    COUNT(*) FILTER (WHERE is_pas_yisroel)
             FROM restaurants",
        )
        .fetch_one(&self.pool)
        .await?;

        let mut stats = StoreStats {
            total: counts.try_get(0)?,
            cholov_yisroel: counts.try_get(1)?,
            pas_yisroel: counts.try_get(2)?,
            ..Default::default()
        };

        let rows = sqlx::query(
            "SELECT kosher_category, COUNT(*) FROM restaurants GROUP BY 1 ORDER BY 2 DESC, 1",
        )
        .fetch_all(&self.pool)
        .await?;
        for r in &rows {
            let cat: String = r.try_get(0)?;
            stats.by_category.push((cat.parse().map_err(anyhow::Error::msg)?, r.try_get(1)?));
        }

        let rows = sqlx::query("SELECT status, COUNT(*) FROM restaurants GROUP BY 1 ORDER BY 2 DESC, 1")
            .fetch_all(&self.pool)
            .await?;
        for r in &rows {
            let status: String = r.try_get(0)?;
            stats.by_status.push((status.parse().map_err(anyhow::Error::msg)?, r.try_get(1)?));
        }

        let last = sqlx::query(
            "SELECT run_id, finished_at, inserted, updated, failed, aborted
             FROM scrape_runs ORDER BY finished_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        stats.last_run = match last {
            Some(r) => Some(RunRecord {
                run_id: r.try_get(0)?,
                finished_at: r.try_get(1)?,
                inserted: r.try_get(2)?,
                updated: r.try_get(3)?,
                failed: r.try_get(4)?,
                aborted: r.try_get(5)?,
            }),
            None => None,
        };
        Ok(stats)
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let c = &summary.counts;
        sqlx::query(
            "INSERT INTO scrape_runs
             (run_id, started_at, finished_at, pages_fetched, pages_failed, listings, classified,
              unknown_category, inserted, updated, unchanged, failed, aborted)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (run_id) DO UPDATE SET
                finished_at = EXCLUDED.finished_at, pages_fetched = EXCLUDED.pages_fetched,
                pages_failed = EXCLUDED.pages_failed, listings = EXCLUDED.listings,
                classified = EXCLUDED.classified, unknown_category = EXCLUDED.unknown_category,
                inserted = EXCLUDED.inserted, updated = EXCLUDED.updated,
                unchanged = EXCLUDED.unchanged, failed = EXCLUDED.failed,
                aborted = EXCLUDED.aborted",
        )
        .bind(&summary.run_id)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .bind(c.pages_fetched as i64)
        .bind(c.pages_failed as i64)
        .bind(c.listings as i64)
        .bind(c.classified as i64)
        .bind(c.unknown_category as i64)
        .bind(c.inserted as i64)
        .bind(c.updated as i64)
        .bind(c.unchanged as i64)
        .bind(c.failed as i64)
        .bind(summary.aborted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Row mapping ──

async fn insert(tx: &mut Transaction<'_, Postgres>, key: &DedupKey, r: &Restaurant) -> Result<()> {
    sqlx::query(
        "INSERT INTO restaurants
         (dedup_key, name, address, city, state, zip_code, certifying_agency,
          kosher_category, is_cholov_yisroel, is_pas_yisroel, listing_type, status,
          hours_of_operation, price_range, short_description, phone_number, website,
          certificate_link, google_listing_url, latitude, longitude, source_url,
          created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24)",
    )
    .bind(key.as_str())
    .bind(&r.name)
    .bind(&r.address)
    .bind(&r.city)
    .bind(&r.state)
    .bind(&r.zip_code)
    .bind(&r.certifying_agency)
    .bind(r.kosher_category.as_str())
    .bind(r.is_cholov_yisroel)
    .bind(r.is_pas_yisroel)
    .bind(&r.listing_type)
    .bind(r.status.as_str())
    .bind(&r.hours_of_operation)
    .bind(&r.price_range)
    .bind(&r.short_description)
    .bind(&r.phone_number)
    .bind(&r.website)
    .bind(&r.certificate_link)
    .bind(&r.google_listing_url)
    .bind(r.latitude)
    .bind(r.longitude)
    .bind(&r.source_url)
    .bind(r.created_at)
    .bind(r.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update(tx: &mut Transaction<'_, Postgres>, r: &Restaurant) -> Result<()> {
    sqlx::query(
        "UPDATE restaurants SET
            zip_code = $2, certifying_agency = $3, kosher_category = $4,
            is_cholov_yisroel = $5, is_pas_yisroel = $6, listing_type = $7,
            hours_of_operation = $8, price_range = $9, short_description = $10,
            phone_number = $11, website = $12, certificate_link = $13,
            google_listing_url = $14, source_url = $15, updated_at = $16
         WHERE id = $1",
    )
    .bind(r.id)
    .bind(&r.zip_code)
    .bind(&r.certifying_agency)
    .bind(r.kosher_category.as_str())
    .bind(r.is_cholov_yisroel)
    .bind(r.is_pas_yisroel)
    .bind(&r.listing_type)
    .bind(&r.hours_of_operation)
    .bind(&r.price_range)
    .bind(&r.short_description)
    .bind(&r.phone_number)
    .bind(&r.website)
    .bind(&r.certificate_link)
    .bind(&r.google_listing_url)
    .bind(&r.source_url)
    .bind(r.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn restaurant_from_row(row: &PgRow) -> Result<Restaurant> {
    let category: String = row.try_get("kosher_category")?;
    let status: String = row.try_get("status")?;
    Ok(Restaurant {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        zip_code: row.try_get("zip_code")?,
        certifying_agency: row.try_get("certifying_agency")?,
        kosher_category: category.parse().map_err(anyhow::Error::msg)?,
        is_cholov_yisroel: row.try_get("is_cholov_yisroel")?,
        is_pas_yisroel: row.try_get("is_pas_yisroel")?,
        listing_type: row.try_get("listing_type")?,
        status: status.parse().map_err(anyhow::Error::msg)?,
        hours_of_operation: row.try_get("hours_of_operation")?,
        price_range: row.try_get("price_range")?,
        short_description: row.try_get("short_description")?,
        phone_number: row.try_get("phone_number")?,
        website: row.try_get("website")?,
        certificate_link: row.try_get("certificate_link")?,
        google_listing_url: row.try_get("google_listing_url")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        source_url: row.try_get("source_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
