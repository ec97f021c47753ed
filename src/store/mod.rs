pub mod postgres;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::UpdatePolicy;
use crate::loader::LoadOutcome;
use crate::metrics::RunSummary;
use crate::models::{DedupKey, KosherCategory, NewRestaurant, Restaurant, Status};

/// Filters for `overview`.
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub category: Option<KosherCategory>,
    pub city: Option<String>,
    pub status: Option<Status>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub finished_at: DateTime<Utc>,
    pub inserted: i64,
    pub updated: i64,
    pub failed: i64,
    pub aborted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub total: i64,
    pub by_category: Vec<(KosherCategory, i64)>,
    pub by_status: Vec<(Status, i64)>,
    pub cholov_yisroel: i64,
    pub pas_yisroel: i64,
    pub last_run: Option<RunRecord>,
}

/// The `restaurants` and `scrape_runs` tables.
#[async_trait]
pub trait Store: Send + Sync {
    async fn init_schema(&self) -> Result<()>;

    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Restaurant>>;

    /// Insert or merge one record inside its own transaction. Any error
    /// rolls the transaction back.
    async fn upsert(&self, key: &DedupKey, rec: &NewRestaurant, policy: UpdatePolicy) -> Result<LoadOutcome>;

    /// Soft delete. Returns false when no row has `id`.
    async fn deactivate(&self, id: i64) -> Result<bool>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Restaurant>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn record_run(&self, summary: &RunSummary) -> Result<()>;
}

/// `postgres://` URLs go to PostgreSQL; anything else names a SQLite file
/// (an optional `sqlite:` prefix is stripped, `:memory:` is in-memory).
pub async fn connect(database_url: &str) -> Result<Box<dyn Store>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        return Ok(Box::new(postgres::PgStore::connect(database_url).await?));
    }
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let store = if path == ":memory:" {
        sqlite::SqliteStore::open_in_memory()?
    } else {
        sqlite::SqliteStore::open(std::path::Path::new(path))?
    };
    Ok(Box::new(store))
}
