mod classify;
mod config;
mod error;
mod fetch;
mod loader;
mod metrics;
mod models;
mod normalize;
mod parser;
mod pipeline;
mod sitemap;
mod store;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use classify::AllowLists;
use config::{CategorySource, FetchBackend, Settings};
use fetch::{HttpSource, PageSource, SpiderSource};
use models::{KosherCategory, Status};
use pipeline::{Pipeline, RunOptions};
use store::ListFilter;

#[derive(Parser)]
#[command(name = "orb_scraper", about = "Kosher restaurant listings scraper for the ORB directory")]
struct Cli {
    /// Config file (default: ./orb_scraper.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// List category pages found in the sitemap
    Discover,
    /// Fetch, classify, normalize and load listings
    Run {
        /// Only these categories (name like "Restaurants » Dairy" or slug like "dairy")
        #[arg(short, long)]
        category: Vec<String>,
        /// Max listings to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Take the category list from the sitemap instead of the config
        #[arg(long)]
        from_sitemap: bool,
        /// Parse and classify without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Show database statistics
    Stats,
    /// Restaurants overview table
    Overview {
        /// Filter by kosher category (meat, dairy, pareve, fish, unknown)
        #[arg(short, long)]
        category: Option<KosherCategory>,
        /// Filter by city
        #[arg(long)]
        city: Option<String>,
        /// Filter by status (active, pending_approval, approved, inactive)
        #[arg(short, long)]
        status: Option<Status>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Mark a restaurant inactive
    Deactivate {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let store = store::connect(&settings.database_url).await?;
            store.init_schema().await?;
            println!("Schema ready at {}", settings.database_url);
            Ok(())
        }
        Commands::Discover => {
            let source = http_source(&settings)?;
            let categories = sitemap::discover_categories(
                &source,
                &settings.sitemap_url,
                &settings.category_pattern,
                Duration::from_millis(settings.request_delay_ms),
            )
            .await?;
            if categories.is_empty() {
                println!("No category pages matched {}", settings.category_pattern);
                return Ok(());
            }
            for c in &categories {
                println!("  {:<32} {}", truncate(&c.name, 32), c.url);
            }
            println!("\n{} categories", categories.len());
            Ok(())
        }
        Commands::Run {
            category,
            limit,
            from_sitemap,
            dry_run,
        } => {
            let lists = match &settings.allow_lists_path {
                Some(path) => AllowLists::load(path)?,
                None => AllowLists::builtin()?,
            };
            let (chalav_stam, pas_yisroel) = lists.sizes();
            tracing::info!(
                version = lists.version(),
                chalav_stam,
                pas_yisroel,
                "Allow lists loaded"
            );

            let source: Box<dyn PageSource> = match settings.fetch_backend {
                FetchBackend::Http => Box::new(http_source(&settings)?),
                FetchBackend::Spider => Box::new(SpiderSource::from_env()?),
            };

            let available = if from_sitemap {
                sitemap::discover_categories(
                    source.as_ref(),
                    &settings.sitemap_url,
                    &settings.category_pattern,
                    Duration::from_millis(settings.request_delay_ms),
                )
                .await?
            } else {
                settings.categories.clone()
            };
            let categories = select_categories(available, &category)?;

            let store = store::connect(&settings.database_url).await?;
            store.init_schema().await?;

            println!(
                "Scraping {} categories{}...",
                categories.len(),
                if dry_run { " (dry run)" } else { "" }
            );
            let opts = RunOptions {
                categories,
                limit,
                dry_run,
                update_policy: settings.update_policy,
                certifying_agency: settings.certifying_agency.clone(),
                request_delay: Duration::from_millis(settings.request_delay_ms),
                // discovery just made requests to the same host
                delay_first_request: from_sitemap,
                max_pages_per_category: settings.max_pages_per_category,
                show_progress: true,
            };
            let pipeline = Pipeline {
                source: source.as_ref(),
                store: store.as_ref(),
                lists: &lists,
            };
            let summary = pipeline.run(&opts).await?;
            summary.print();

            if summary.aborted {
                bail!("Run {} aborted: no category page could be fetched", summary.run_id);
            }
            Ok(())
        }
        Commands::Stats => {
            let store = store::connect(&settings.database_url).await?;
            store.init_schema().await?;
            let s = store.stats().await?;
            println!("Total:          {}", s.total);
            for (category, n) in &s.by_category {
                println!("  {:<12} {}", category, n);
            }
            for (status, n) in &s.by_status {
                println!("  {:<16} {}", status, n);
            }
            println!("Cholov Yisroel: {}", s.cholov_yisroel);
            println!("Pas Yisroel:    {}", s.pas_yisroel);
            match &s.last_run {
                Some(r) => println!(
                    "Last run:       {} at {} ({} inserted, {} updated, {} failed{})",
                    r.run_id,
                    r.finished_at.format("%Y-%m-%d %H:%M"),
                    r.inserted,
                    r.updated,
                    r.failed,
                    if r.aborted { ", aborted" } else { "" }
                ),
                None => println!("Last run:       never"),
            }
            Ok(())
        }
        Commands::Overview {
            category,
            city,
            status,
            limit,
        } => {
            let store = store::connect(&settings.database_url).await?;
            store.init_schema().await?;
            let rows = store
                .list(&ListFilter {
                    category,
                    city,
                    status,
                    limit,
                })
                .await?;
            if rows.is_empty() {
                println!("No restaurants found.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<28} | {:<7} | {:<3} | {:<3} | {:<30} | {:<18} | {:<8}",
                "ID", "Restaurant", "Type", "CY", "PY", "Address", "City", "Status"
            );
            println!("{}", "-".repeat(120));

            for r in &rows {
                let cy = match r.is_cholov_yisroel {
                    Some(true) => "yes",
                    Some(false) => "no",
                    None => "-",
                };
                println!(
                    "{:>4} | {:<28} | {:<7} | {:<3} | {:<3} | {:<30} | {:<18} | {:<8}",
                    r.id,
                    truncate(&r.name, 28),
                    r.kosher_category,
                    cy,
                    if r.is_pas_yisroel { "yes" } else { "-" },
                    truncate(&r.address, 30),
                    truncate(&r.city, 18),
                    r.status
                );
            }

            println!("\n{} restaurants", rows.len());
            Ok(())
        }
        Commands::Deactivate { id } => {
            let store = store::connect(&settings.database_url).await?;
            store.init_schema().await?;
            if !store.deactivate(id).await? {
                bail!("No restaurant with id {}", id);
            }
            println!("Restaurant {} marked inactive", id);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn http_source(settings: &Settings) -> anyhow::Result<HttpSource> {
    HttpSource::new(&settings.user_agent, Duration::from_secs(settings.request_timeout_secs))
        .context("Failed to build HTTP client")
}

/// Keep the categories named on the command line (all when none are given).
/// A name matches the full category name or the last URL segment, ignoring case.
fn select_categories(available: Vec<CategorySource>, wanted: &[String]) -> anyhow::Result<Vec<CategorySource>> {
    if wanted.is_empty() {
        return Ok(available);
    }
    let matches = |c: &CategorySource, w: &str| {
        let slug = c.url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        c.name.eq_ignore_ascii_case(w.trim()) || slug.eq_ignore_ascii_case(w.trim())
    };
    let selected: Vec<CategorySource> = available
        .iter()
        .filter(|c| wanted.iter().any(|w| matches(c, w)))
        .cloned()
        .collect();
    if selected.is_empty() {
        let names: Vec<&str> = available.iter().map(|c| c.name.as_str()).collect();
        bail!("No category matches {:?}; available: {}", wanted, names.join(", "));
    }
    Ok(selected)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_categories_by_name_or_slug() {
        let all = Settings::default().categories;
        let picked = select_categories(all.clone(), &["restaurants » dairy".into(), "fish".into()]).unwrap();
        let names: Vec<&str> = picked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Restaurants » Dairy", "Restaurants » Fish"]);

        assert_eq!(select_categories(all.clone(), &[]).unwrap().len(), 4);

        let err = select_categories(all, &["bakeries".into()]).unwrap_err();
        assert!(err.to_string().contains("Restaurants » Meat"));
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "orb_scraper", "run", "-c", "dairy", "--category", "meat", "-n", "5", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { category, limit, dry_run, from_sitemap } => {
                assert_eq!(category, ["dairy", "meat"]);
                assert_eq!(limit, Some(5));
                assert!(dry_run);
                assert!(!from_sitemap);
            }
            _ => panic!("expected run"),
        }

        let cli = Cli::try_parse_from(["orb_scraper", "overview", "-c", "dairy", "-s", "active"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Overview { category: Some(KosherCategory::Dairy), status: Some(Status::Active), limit: 50, .. }
        ));
    }

    #[test]
    fn truncates_and_formats() {
        assert_eq!(truncate("Hollywood Deli", 9), "Hollywood...");
        assert_eq!(truncate("Deli", 9), "Deli");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
