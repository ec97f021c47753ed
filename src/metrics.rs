use std::fmt::Display;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{RecordError, Stage};
use crate::loader::LoadOutcome;
use crate::models::KosherCategory;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub listings: usize,
    pub classified: usize,
    pub unknown_category: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Listings seen again under another category in the same run.
    pub duplicates: usize,
    pub failed: usize,
}

/// A page or record that was skipped, with enough context to find it again.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub stage: Stage,
    pub name: Option<String>,
    pub address: Option<String>,
    pub url: String,
    pub error: String,
}

/// Counters and failures for one pipeline run. Passed explicitly through
/// the run; nothing is global.
pub struct RunTracker {
    run_id: String,
    started_at: DateTime<Utc>,
    counts: RunCounts,
    failures: Vec<Failure>,
    aborted: bool,
}

impl RunTracker {
    pub fn new(run_id: String) -> Self {
        RunTracker {
            run_id,
            started_at: Utc::now(),
            counts: RunCounts::default(),
            failures: Vec::new(),
            aborted: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn page_fetched(&mut self) {
        self.counts.pages_fetched += 1;
    }

    pub fn page_failed(&mut self, url: &str, stage: Stage, err: &dyn Display) {
        warn!(url, stage = %stage, "Skipping page: {}", err);
        self.counts.pages_failed += 1;
        self.failures.push(Failure {
            stage,
            name: None,
            address: None,
            url: url.to_string(),
            error: err.to_string(),
        });
    }

    pub fn listings_parsed(&mut self, n: usize) {
        self.counts.listings += n;
    }

    pub fn classified(&mut self, name: &str, category: KosherCategory, raw: Option<&str>) {
        self.counts.classified += 1;
        if category == KosherCategory::Unknown {
            debug!(name, category = raw.unwrap_or(""), "Unmapped kosher category");
            self.counts.unknown_category += 1;
        }
    }

    pub fn duplicate(&mut self, name: &str, category: KosherCategory) {
        debug!(name, category = %category, "Listing already seen this run");
        self.counts.duplicates += 1;
    }

    pub fn record_failed(&mut self, name: &str, address: Option<&str>, url: &str, err: &RecordError) {
        warn!(
            name,
            address = address.unwrap_or(""),
            stage = %err.stage(),
            "Skipping record: {}",
            err
        );
        self.counts.failed += 1;
        self.failures.push(Failure {
            stage: err.stage(),
            name: Some(name.to_string()),
            address: address.map(String::from),
            url: url.to_string(),
            error: err.to_string(),
        });
    }

    pub fn loaded(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Inserted => self.counts.inserted += 1,
            LoadOutcome::Updated => self.counts.updated += 1,
            LoadOutcome::Unchanged => self.counts.unchanged += 1,
        }
    }

    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn finish(self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            counts: self.counts,
            failures: self.failures,
            aborted: self.aborted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub failures: Vec<Failure>,
    pub aborted: bool,
}

impl RunSummary {
    pub fn print(&self) {
        let c = &self.counts;
        println!("\nRun {}{}", self.run_id, if self.aborted { " (aborted)" } else { "" });
        println!("  Pages:      {} fetched, {} failed", c.pages_fetched, c.pages_failed);
        println!(
            "  Listings:   {} parsed, {} classified ({} unknown category)",
            c.listings, c.classified, c.unknown_category
        );
        println!(
            "  Records:    {} inserted, {} updated, {} unchanged, {} duplicates, {} failed",
            c.inserted, c.updated, c.unchanged, c.duplicates, c.failed
        );

        if !self.failures.is_empty() {
            println!("\n--- Failures ---");
            for f in &self.failures {
                match (&f.name, &f.address) {
                    (Some(name), Some(addr)) => {
                        println!("  [{}] {} ({}): {}", f.stage, name, addr, f.error)
                    }
                    (Some(name), None) => println!("  [{}] {}: {}", f.stage, name, f.error),
                    _ => println!("  [{}] {}: {}", f.stage, f.url, f.error),
                }
            }
        }
    }
}

pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifyError;

    #[test]
    fn counts_and_failures() {
        let mut t = RunTracker::new("run-test".into());
        t.page_fetched();
        t.page_failed("https://orb.test/x", Stage::Fetch, &"HTTP 503");
        t.listings_parsed(3);
        t.classified("Cafe Noir", KosherCategory::Dairy, Some("Dairy"));
        t.classified("Bagel Boss", KosherCategory::Unknown, Some("Bakeries"));
        t.loaded(LoadOutcome::Inserted);
        t.loaded(LoadOutcome::Unchanged);
        t.duplicate("Cafe Noir", KosherCategory::Fish);
        t.record_failed("", Some("1 Main Street"), "https://orb.test/y", &ClassifyError::MissingName.into());

        let s = t.finish();
        assert_eq!(s.run_id, "run-test");
        assert_eq!(
            s.counts,
            RunCounts {
                pages_fetched: 1,
                pages_failed: 1,
                listings: 3,
                classified: 2,
                unknown_category: 1,
                inserted: 1,
                updated: 0,
                unchanged: 1,
                duplicates: 1,
                failed: 1,
            }
        );
        assert_eq!(s.failures.len(), 2);
        assert_eq!(s.failures[0].stage, Stage::Fetch);
        assert_eq!(s.failures[1].stage, Stage::Classify);
        assert_eq!(s.failures[1].address.as_deref(), Some("1 Main Street"));
        assert!(!s.aborted);
        assert!(s.finished_at >= s.started_at);
    }

    #[test]
    fn run_id_is_timestamped() {
        let id = new_run_id();
        assert!(id.starts_with("run-20"));
        assert_eq!(id.len(), "run-20240101T000000".len());
    }
}
