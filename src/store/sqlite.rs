use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};

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

/// Local store. One connection, serialized behind a mutex; no await point
/// is reached while it is held.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS restaurants (
                id                 INTEGER PRIMARY KEY,
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
                is_pas_yisroel     BOOLEAN NOT NULL DEFAULT 0,
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
                latitude           REAL,
                longitude          REAL,
                source_url         TEXT,
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL,
                CHECK(is_cholov_yisroel IS NULL OR kosher_category = 'dairy')
            );
            CREATE INDEX IF NOT EXISTS idx_restaurants_category ON restaurants(kosher_category);
            CREATE INDEX IF NOT EXISTS idx_restaurants_city ON restaurants(city);
            CREATE INDEX IF NOT EXISTS idx_restaurants_status ON restaurants(status);

            CREATE TABLE IF NOT EXISTS scrape_runs (
                run_id           TEXT PRIMARY KEY,
                started_at       TEXT NOT NULL,
                finished_at      TEXT NOT NULL,
                pages_fetched    INTEGER NOT NULL,
                pages_failed     INTEGER NOT NULL,
                listings         INTEGER NOT NULL,
                classified       INTEGER NOT NULL,
                unknown_category INTEGER NOT NULL,
                inserted         INTEGER NOT NULL,
                updated          INTEGER NOT NULL,
                unchanged        INTEGER NOT NULL,
                failed           INTEGER NOT NULL,
                aborted          BOOLEAN NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(())
    }

    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Restaurant>> {
        let conn = self.lock()?;
        find(&conn, key)
    }

    async fn upsert(&self, key: &DedupKey, rec: &NewRestaurant, policy: UpdatePolicy) -> Result<LoadOutcome> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let outcome = match find(&tx, key)? {
            None => {
                insert(&tx, key, &new_row(rec)).context("insert restaurant")?;
                LoadOutcome::Inserted
            }
            Some(existing) => match merge(&existing, rec, policy) {
                Some(row) => {
                    update(&tx, &row).context("update restaurant")?;
                    LoadOutcome::Updated
                }
                None => LoadOutcome::Unchanged,
            },
        };
        tx.commit()?;
        Ok(outcome)
    }

    async fn deactivate(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE restaurants SET status = 'inactive', updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(n > 0)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Restaurant>> {
        let conn = self.lock()?;
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(c) = filter.category {
            conditions.push(format!("kosher_category = ?{}", params.len() + 1));
            params.push(Box::new(c.as_str()));
        }
        if let Some(city) = &filter.city {
            conditions.push(format!("city = ?{} COLLATE NOCASE", params.len() + 1));
            params.push(Box::new(city.clone()));
        }
        if let Some(s) = filter.status {
            conditions.push(format!("status = ?{}", params.len() + 1));
            params.push(Box::new(s.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM restaurants{} ORDER BY city, name LIMIT {}",
            COLUMNS, where_clause, filter.limit
        );

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), restaurant_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };

        let mut stats = StoreStats {
            total: count("SELECT COUNT(*) FROM restaurants")?,
            cholov_yisroel: count("SELECT COUNT(*) FROM restaurants WHERE is_cholov_yisroel = 1")?,
            pas_yisroel: count("SELECT COUNT(*) FROM restaurants WHERE is_pas_yisroel = 1")?,
            ..Default::default()
        };

        let mut stmt = conn.prepare(
            "SELECT kosher_category, COUNT(*) FROM restaurants GROUP BY kosher_category ORDER BY 2 DESC, 1",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (cat, n) in rows {
            stats.by_category.push((cat.parse().map_err(anyhow::Error::msg)?, n));
        }

        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM restaurants GROUP BY status ORDER BY 2 DESC, 1",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, n) in rows {
            stats.by_status.push((status.parse().map_err(anyhow::Error::msg)?, n));
        }

        stats.last_run = conn
            .query_row(
                "SELECT run_id, finished_at, inserted, updated, failed, aborted
                 FROM scrape_runs ORDER BY finished_at DESC LIMIT 1",
                [],
                |r| {
                    Ok(RunRecord {
                        run_id: r.get(0)?,
                        finished_at: timestamp(r, 1)?,
                        inserted: r.get(2)?,
                        updated: r.get(3)?,
                        failed: r.get(4)?,
                        aborted: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let conn = self.lock()?;
        let c = &summary.counts;
        conn.execute(
            "INSERT OR REPLACE INTO scrape_runs
             (run_id, started_at, finished_at, pages_fetched, pages_failed, listings, classified,
              unknown_category, inserted, updated, unchanged, failed, aborted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                summary.run_id,
                summary.started_at.to_rfc3339(),
                summary.finished_at.to_rfc3339(),
                c.pages_fetched as i64,
                c.pages_failed as i64,
                c.listings as i64,
                c.classified as i64,
                c.unknown_category as i64,
                c.inserted as i64,
                c.updated as i64,
                c.unchanged as i64,
                c.failed as i64,
                summary.aborted,
            ],
        )?;
        Ok(())
    }
}

// ── Row mapping ──

fn find(conn: &Connection, key: &DedupKey) -> Result<Option<Restaurant>> {
    let sql = format!("SELECT {} FROM restaurants WHERE dedup_key = ?1", COLUMNS);
    let row = conn
        .query_row(&sql, [key.as_str()], restaurant_from_row)
        .optional()?;
    Ok(row)
}

fn insert(conn: &Connection, key: &DedupKey, r: &Restaurant) -> Result<()> {
    conn.execute(
        "INSERT INTO restaurants
         (dedup_key, name, address, city, state, zip_code, certifying_agency,
          kosher_category, is_cholov_yisroel, is_pas_yisroel, listing_type, status,
          hours_of_operation, price_range, short_description, phone_number, website,
          certificate_link, google_listing_url, latitude, longitude, source_url,
          created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24)",
        rusqlite::params![
            key.as_str(), r.name, r.address, r.city, r.state, r.zip_code, r.certifying_agency,
            r.kosher_category.as_str(), r.is_cholov_yisroel, r.is_pas_yisroel, r.listing_type,
            r.status.as_str(), r.hours_of_operation, r.price_range, r.short_description,
            r.phone_number, r.website, r.certificate_link, r.google_listing_url, r.latitude,
            r.longitude, r.source_url, r.created_at.to_rfc3339(), r.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn update(conn: &Connection, r: &Restaurant) -> Result<()> {
    conn.execute(
        "UPDATE restaurants SET
            zip_code = ?2, certifying_agency = ?3, kosher_category = ?4,
            is_cholov_yisroel = ?5, is_pas_yisroel = ?6, listing_type = ?7,
            hours_of_operation = ?8, price_range = ?9, short_description = ?10,
            phone_number = ?11, website = ?12, certificate_link = ?13,
            google_listing_url = ?14, source_url = ?15, updated_at = ?16
         WHERE id = ?1",
        rusqlite::params![
            r.id, r.zip_code, r.certifying_agency, r.kosher_category.as_str(),
            r.is_cholov_yisroel, r.is_pas_yisroel, r.listing_type, r.hours_of_operation,
            r.price_range, r.short_description, r.phone_number, r.website,
            r.certificate_link, r.google_listing_url, r.source_url, r.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn restaurant_from_row(row: &rusqlite::Row) -> rusqlite::Result<Restaurant> {
    Ok(Restaurant {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        city: row.get(3)?,
        state: row.get(4)?,
        zip_code: row.get(5)?,
        certifying_agency: row.get(6)?,
        kosher_category: parsed(row, 7)?,
        is_cholov_yisroel: row.get(8)?,
        is_pas_yisroel: row.get(9)?,
        listing_type: row.get(10)?,
        status: parsed(row, 11)?,
        hours_of_operation: row.get(12)?,
        price_range: row.get(13)?,
        short_description: row.get(14)?,
        phone_number: row.get(15)?,
        website: row.get(16)?,
        certificate_link: row.get(17)?,
        google_listing_url: row.get(18)?,
        latitude: row.get(19)?,
        longitude: row.get(20)?,
        source_url: row.get(21)?,
        created_at: timestamp(row, 22)?,
        updated_at: timestamp(row, 23)?,
    })
}

fn parsed<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
