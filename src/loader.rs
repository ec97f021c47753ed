use chrono::Utc;
use tracing::debug;

use crate::config::UpdatePolicy;
use crate::error::RecordError;
use crate::models::{NewRestaurant, Restaurant, Status};
use crate::store::Store;

const DEFAULT_LISTING_TYPE: &str = "restaurant";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted,
    Updated,
    /// Already stored with the same values, or left alone by the policy.
    Unchanged,
}

/// Row for a listing seen for the first time.
pub fn new_row(rec: &NewRestaurant) -> Restaurant {
    let now = Utc::now();
    Restaurant {
        id: 0,
        name: rec.name.clone(),
        address: rec.address.clone(),
        city: rec.city.clone(),
        state: rec.state.clone(),
        zip_code: rec.zip_code.clone(),
        certifying_agency: rec.certifying_agency.clone(),
        kosher_category: rec.classification.kosher_category,
        is_cholov_yisroel: rec.classification.is_cholov_yisroel,
        is_pas_yisroel: rec.classification.is_pas_yisroel,
        listing_type: Some(DEFAULT_LISTING_TYPE.to_string()),
        status: Status::Active,
        hours_of_operation: rec.hours_of_operation.clone(),
        price_range: rec.price_range.clone(),
        short_description: rec.short_description.clone(),
        phone_number: rec.phone_number.clone(),
        website: rec.website.clone(),
        certificate_link: rec.certificate_link.clone(),
        google_listing_url: rec.google_listing_url.clone(),
        latitude: None,
        longitude: None,
        source_url: Some(rec.source_url.clone()),
        created_at: now,
        updated_at: now,
    }
}

/// Apply `incoming` to the stored row under `policy`. Returns `None` when
/// nothing would change. Identity columns, `status` and coordinates are
/// never touched by a scrape.
pub fn merge(existing: &Restaurant, incoming: &NewRestaurant, policy: UpdatePolicy) -> Option<Restaurant> {
    if policy == UpdatePolicy::Skip {
        return None;
    }

    let mut row = existing.clone();
    let overwrite = policy == UpdatePolicy::Overwrite;
    let scraped = |slot: &mut Option<String>, value: &Option<String>| {
        if value.is_some() && (overwrite || slot.is_none()) {
            slot.clone_from(value);
        }
    };

    scraped(&mut row.zip_code, &incoming.zip_code);
    scraped(&mut row.phone_number, &incoming.phone_number);
    scraped(&mut row.website, &incoming.website);
    scraped(&mut row.hours_of_operation, &incoming.hours_of_operation);
    scraped(&mut row.certificate_link, &incoming.certificate_link);
    scraped(&mut row.google_listing_url, &incoming.google_listing_url);
    scraped(&mut row.short_description, &incoming.short_description);
    scraped(&mut row.source_url, &Some(incoming.source_url.clone()));
    if overwrite {
        row.certifying_agency.clone_from(&incoming.certifying_agency);
    }

    // fill-only regardless of policy
    if row.price_range.is_none() {
        row.price_range.clone_from(&incoming.price_range);
    }
    if row.listing_type.is_none() {
        row.listing_type = Some(DEFAULT_LISTING_TYPE.to_string());
    }

    let c = incoming.classification;
    row.kosher_category = c.kosher_category;
    row.is_cholov_yisroel = c.is_cholov_yisroel;
    row.is_pas_yisroel = c.is_pas_yisroel;

    if row == *existing {
        return None;
    }
    row.updated_at = Utc::now();
    Some(row)
}

/// Writes classified, normalized records through a `Store`.
pub struct Loader<'a> {
    store: &'a dyn Store,
    policy: UpdatePolicy,
    dry_run: bool,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn Store, policy: UpdatePolicy) -> Self {
        Loader {
            store,
            policy,
            dry_run: false,
        }
    }

    /// Report what would happen without writing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn load(&self, rec: &NewRestaurant) -> Result<LoadOutcome, RecordError> {
        let key = rec.dedup_key();
        let outcome = if self.dry_run {
            match self.store.find_by_key(&key).await.map_err(|e| RecordError::load(&e))? {
                None => LoadOutcome::Inserted,
                Some(existing) => match merge(&existing, rec, self.policy) {
                    Some(_) => LoadOutcome::Updated,
                    None => LoadOutcome::Unchanged,
                },
            }
        } else {
            self.store
                .upsert(&key, rec, self.policy)
                .await
                .map_err(|e| RecordError::load(&e))?
        };
        debug!(name = %rec.name, key = %key, ?outcome, "Loaded");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, KosherCategory};
    use crate::store::sqlite::SqliteStore;

    fn record() -> NewRestaurant {
        NewRestaurant {
            name: "Hollywood Deli".into(),
            address: "4000 N 46th Avenue".into(),
            city: "Hollywood".into(),
            state: "FL".into(),
            zip_code: Some("33021".into()),
            certifying_agency: "ORB".into(),
            classification: Classification {
                kosher_category: KosherCategory::Dairy,
                is_cholov_yisroel: Some(false),
                is_pas_yisroel: false,
            },
            hours_of_operation: Some("Sun-Thu 7am-9pm".into()),
            price_range: None,
            short_description: None,
            phone_number: Some("(954) 555-1234".into()),
            website: Some("https://www.hollywooddeli.com".into()),
            certificate_link: None,
            google_listing_url: None,
            source_url: "https://www.orbkosher.com/category/restaurants/dairy/".into(),
        }
    }

    #[test]
    fn identical_record_is_unchanged() {
        let existing = new_row(&record());
        for policy in [UpdatePolicy::Overwrite, UpdatePolicy::FillNulls, UpdatePolicy::Skip] {
            assert!(merge(&existing, &record(), policy).is_none(), "{:?}", policy);
        }
    }

    #[test]
    fn overwrite_replaces_scraped_fields_but_keeps_nulls_out() {
        let existing = new_row(&record());
        let mut incoming = record();
        incoming.phone_number = Some("(954) 555-0000".into());
        incoming.website = None;

        let merged = merge(&existing, &incoming, UpdatePolicy::Overwrite).unwrap();
        assert_eq!(merged.phone_number.as_deref(), Some("(954) 555-0000"));
        assert_eq!(merged.website.as_deref(), Some("https://www.hollywooddeli.com"));
        assert!(merged.updated_at >= existing.updated_at);
        assert_eq!(merged.created_at, existing.created_at);
    }

    #[test]
    fn fill_nulls_only_fills() {
        let mut existing = new_row(&record());
        existing.short_description = None;
        let mut incoming = record();
        incoming.phone_number = Some("(954) 555-0000".into());
        incoming.short_description = Some("Deli and grill".into());

        let merged = merge(&existing, &incoming, UpdatePolicy::FillNulls).unwrap();
        assert_eq!(merged.phone_number.as_deref(), Some("(954) 555-1234"));
        assert_eq!(merged.short_description.as_deref(), Some("Deli and grill"));
    }

    #[test]
    fn classification_refreshed_and_status_kept() {
        let mut existing = new_row(&record());
        existing.status = Status::Inactive;
        existing.latitude = Some(26.0);
        let mut incoming = record();
        incoming.classification = Classification {
            kosher_category: KosherCategory::Meat,
            is_cholov_yisroel: None,
            is_pas_yisroel: true,
        };

        let merged = merge(&existing, &incoming, UpdatePolicy::FillNulls).unwrap();
        assert_eq!(merged.kosher_category, KosherCategory::Meat);
        assert_eq!(merged.is_cholov_yisroel, None);
        assert!(merged.is_pas_yisroel);
        assert_eq!(merged.status, Status::Inactive);
        assert_eq!(merged.latitude, Some(26.0));
    }

    #[test]
    fn skip_never_updates() {
        let existing = new_row(&record());
        let mut incoming = record();
        incoming.phone_number = Some("(954) 555-0000".into());
        assert!(merge(&existing, &incoming, UpdatePolicy::Skip).is_none());
    }

    #[tokio::test]
    async fn loader_inserts_then_reports_unchanged() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().await.unwrap();
        let loader = Loader::new(&store, UpdatePolicy::Overwrite);

        assert_eq!(loader.load(&record()).await.unwrap(), LoadOutcome::Inserted);
        assert_eq!(loader.load(&record()).await.unwrap(), LoadOutcome::Unchanged);

        let mut changed = record();
        changed.hours_of_operation = Some("Sun-Fri 7am-3pm".into());
        assert_eq!(loader.load(&changed).await.unwrap(), LoadOutcome::Updated);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().await.unwrap();
        let loader = Loader::new(&store, UpdatePolicy::Overwrite).dry_run(true);

        assert_eq!(loader.load(&record()).await.unwrap(), LoadOutcome::Inserted);
        assert_eq!(loader.load(&record()).await.unwrap(), LoadOutcome::Inserted);
        assert_eq!(store.stats().await.unwrap().total, 0);
    }
}
