use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::classify::{classify, AllowLists};
use crate::config::{CategorySource, UpdatePolicy};
use crate::error::{RecordError, Stage};
use crate::fetch::PageSource;
use crate::loader::Loader;
use crate::metrics::{new_run_id, RunSummary, RunTracker};
use crate::models::{DedupKey, NewRestaurant, RawListing};
use crate::normalize::normalize_listing;
use crate::parser::parse_page;
use crate::store::Store;

pub struct RunOptions {
    pub categories: Vec<CategorySource>,
    /// Stop after this many listings.
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub update_policy: UpdatePolicy,
    pub certifying_agency: String,
    pub request_delay: Duration,
    /// Wait before the first request too (the sitemap was just fetched).
    pub delay_first_request: bool,
    pub max_pages_per_category: usize,
    pub show_progress: bool,
}

/// Everything a run needs, borrowed for its duration.
pub struct Pipeline<'a> {
    pub source: &'a dyn PageSource,
    pub store: &'a dyn Store,
    pub lists: &'a AllowLists,
}

/// Records of one run keyed by dedup key. A listing found under a second
/// category is folded into the first one, so the row loaded for it does not
/// depend on which page came last.
#[derive(Default)]
struct RunBatch {
    records: Vec<NewRestaurant>,
    index: HashMap<DedupKey, usize>,
}

impl RunBatch {
    /// Returns the record back when its key is already in the batch.
    fn add(&mut self, rec: NewRestaurant) -> Option<NewRestaurant> {
        match self.index.entry(rec.dedup_key()) {
            Entry::Occupied(slot) => {
                let kept = &mut self.records[*slot.get()];
                kept.classification = kept.classification.combine(rec.classification);
                Some(rec)
            }
            Entry::Vacant(slot) => {
                slot.insert(self.records.len());
                self.records.push(rec);
                None
            }
        }
    }
}

impl Pipeline<'_> {
    /// fetch → parse → classify → normalize → dedupe → load. Pages are
    /// crawled first and the deduplicated records loaded one at a time after.
    /// The run is recorded in `scrape_runs` (unless dry) and marked aborted
    /// when no category page could be fetched at all.
    pub async fn run(&self, opts: &RunOptions) -> Result<RunSummary> {
        let mut tracker = RunTracker::new(new_run_id());
        let loader = Loader::new(self.store, opts.update_policy).dry_run(opts.dry_run);
        info!(
            run_id = tracker.run_id(),
            categories = opts.categories.len(),
            dry_run = opts.dry_run,
            "Starting run"
        );

        let pb = if opts.show_progress {
            let pb = ProgressBar::new(opts.categories.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
                    .progress_chars("=> "),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut batch = RunBatch::default();
        let mut reachable = 0usize;
        let mut processed = 0usize;
        let mut first_request = !opts.delay_first_request;

        'categories: for category in &opts.categories {
            pb.set_message(category.name.clone());
            let mut visited = HashSet::new();
            let mut next = Some(category.url.clone());
            let mut pages = 0usize;

            while let Some(url) = next.take() {
                if pages >= opts.max_pages_per_category || !visited.insert(url.clone()) {
                    break;
                }
                if !first_request && !opts.request_delay.is_zero() {
                    tokio::time::sleep(opts.request_delay).await;
                }
                first_request = false;
                pages += 1;

                let page = match self.source.fetch(&url).await {
                    Ok(page) => page,
                    Err(e) => {
                        tracker.page_failed(&url, Stage::Fetch, &e);
                        break;
                    }
                };
                tracker.page_fetched();
                if pages == 1 {
                    reachable += 1;
                }

                let parsed = match parse_page(&page, &category.name) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracker.page_failed(&url, Stage::Parse, &e);
                        break;
                    }
                };
                tracker.listings_parsed(parsed.listings.len());

                for raw in &parsed.listings {
                    if opts.limit.is_some_and(|n| processed >= n) {
                        info!("Listing limit reached");
                        break 'categories;
                    }
                    processed += 1;
                    let Some(rec) = self.prepare(raw, opts, &mut tracker) else {
                        continue;
                    };
                    if let Some(dup) = batch.add(rec) {
                        tracker.duplicate(&dup.name, dup.classification.kosher_category);
                    }
                }
                next = parsed.next_page;
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        if reachable == 0 && !opts.categories.is_empty() {
            warn!("No category page could be fetched; aborting run");
            tracker.abort();
        }

        info!(records = batch.records.len(), "Loading records");
        for rec in &batch.records {
            match loader.load(rec).await {
                Ok(outcome) => tracker.loaded(outcome),
                Err(e) => tracker.record_failed(&rec.name, Some(&rec.address), &rec.source_url, &e),
            }
        }

        let summary = tracker.finish();
        if !opts.dry_run {
            self.store.record_run(&summary).await?;
        }
        Ok(summary)
    }

    /// Classify and normalize one listing. Failures are recorded and give `None`.
    fn prepare(&self, raw: &RawListing, opts: &RunOptions, tracker: &mut RunTracker) -> Option<NewRestaurant> {
        let street = raw.street.as_deref();

        let classification = match classify(raw.category.as_deref(), &raw.name, self.lists) {
            Ok(c) => c,
            Err(e) => {
                tracker.record_failed(&raw.name, street, &raw.source_url, &RecordError::from(e));
                return None;
            }
        };
        tracker.classified(&raw.name, classification.kosher_category, raw.category.as_deref());

        match normalize_listing(raw, classification, &opts.certifying_agency) {
            Ok(rec) => Some(rec),
            Err(e) => {
                tracker.record_failed(&raw.name, street, &raw.source_url, &RecordError::from(e));
                None
            }
        }
    }
}
