use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "orb_scraper";
const ENV_PREFIX: &str = "ORB";

/// How the loader treats a listing that already has a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Replace scraped fields with non-null incoming values.
    #[default]
    Overwrite,
    /// Only fill fields that are still null.
    FillNulls,
    /// Never touch existing rows.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchBackend {
    #[default]
    Http,
    Spider,
}

/// One upstream category listing page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategorySource {
    pub name: String,
    pub url: String,
}

impl CategorySource {
    pub fn new(name: &str, url: &str) -> Self {
        CategorySource {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `postgres://...` for PostgreSQL, anything else is a SQLite path.
    pub database_url: String,
    /// Replaces the built-in allow lists when set.
    pub allow_lists_path: Option<PathBuf>,
    pub certifying_agency: String,
    pub update_policy: UpdatePolicy,
    pub fetch_backend: FetchBackend,
    pub user_agent: String,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_pages_per_category: usize,
    pub sitemap_url: String,
    /// Sitemap URLs matching this pattern are category pages; group 1 is the slug.
    pub category_pattern: String,
    pub categories: Vec<CategorySource>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "data/orb.sqlite".into(),
            allow_lists_path: None,
            certifying_agency: "ORB".into(),
            update_policy: UpdatePolicy::default(),
            fetch_backend: FetchBackend::default(),
            user_agent: concat!("orb_scraper/", env!("CARGO_PKG_VERSION")).into(),
            request_delay_ms: 1500,
            request_timeout_secs: 30,
            max_pages_per_category: 10,
            sitemap_url: "https://www.orbkosher.com/sitemap_index.xml".into(),
            category_pattern: r"^https://www\.orbkosher\.com/category/restaurants/([a-z0-9-]+)/?$"
                .into(),
            categories: vec![
                CategorySource::new(
                    "Restaurants » Dairy",
                    "https://www.orbkosher.com/category/restaurants/dairy/",
                ),
                CategorySource::new(
                    "Restaurants » Meat",
                    "https://www.orbkosher.com/category/restaurants/meat/",
                ),
                CategorySource::new(
                    "Restaurants » Pareve",
                    "https://www.orbkosher.com/category/restaurants/pareve/",
                ),
                CategorySource::new(
                    "Restaurants » Fish",
                    "https://www.orbkosher.com/category/restaurants/fish/",
                ),
            ],
        }
    }
}

/// Defaults, then `orb_scraper.toml` (or `path`), then `ORB_*` variables.
/// A `.env` file is read first; `DATABASE_URL` applies when
/// `ORB_DATABASE_URL` is not set.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let _ = dotenvy::dotenv();
    let mut settings = build(path, env_source())?;
    if std::env::var_os("ORB_DATABASE_URL").is_none() {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database_url = url;
        }
    }
    Ok(settings)
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn build(path: Option<&Path>, env: Environment) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };
    let settings = Config::builder()
        .add_source(file)
        .add_source(env)
        .build()
        .context("Failed to read configuration")?
        .try_deserialize::<Settings>()
        .context("Invalid configuration")?;
    Ok(settings)
}
