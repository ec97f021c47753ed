use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::fold;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KosherCategory {
    Meat,
    Dairy,
    Pareve,
    Fish,
    Unknown,
}

impl KosherCategory {
    pub const ALL: [KosherCategory; 5] = [
        KosherCategory::Meat,
        KosherCategory::Dairy,
        KosherCategory::Pareve,
        KosherCategory::Fish,
        KosherCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KosherCategory::Meat => "meat",
            KosherCategory::Dairy => "dairy",
            KosherCategory::Pareve => "pareve",
            KosherCategory::Fish => "fish",
            KosherCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for KosherCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KosherCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KosherCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown kosher category '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    PendingApproval,
    Approved,
    Inactive,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Active,
        Status::PendingApproval,
        Status::Approved,
        Status::Inactive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::PendingApproval => "pending_approval",
            Status::Approved => "approved",
            Status::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// A listing as it comes off an upstream page, before classification and
/// normalization. Every field except `name` may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawListing {
    pub name: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub certificate_link: Option<String>,
    pub google_listing_url: Option<String>,
    pub hours: Option<String>,
    pub price_range: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub certifying_agency: Option<String>,
    pub source_url: String,
}

/// Supervision flags assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kosher_category: KosherCategory,
    /// Only ever `Some` for dairy.
    pub is_cholov_yisroel: Option<bool>,
    pub is_pas_yisroel: bool,
}

impl Classification {
    /// Flags for one restaurant listed under two categories. The result does
    /// not depend on the order: the stronger category keeps its cholov flag
    /// (meat, dairy, fish, pareve, unknown) and pas yisroel from either holds.
    pub fn combine(self, other: Classification) -> Classification {
        let winner = if rank(other.kosher_category) > rank(self.kosher_category) {
            other
        } else {
            self
        };
        Classification {
            kosher_category: winner.kosher_category,
            is_cholov_yisroel: winner.is_cholov_yisroel,
            is_pas_yisroel: self.is_pas_yisroel || other.is_pas_yisroel,
        }
    }
}

fn rank(category: KosherCategory) -> u8 {
    match category {
        KosherCategory::Meat => 4,
        KosherCategory::Dairy => 3,
        KosherCategory::Fish => 2,
        KosherCategory::Pareve => 1,
        KosherCategory::Unknown => 0,
    }
}

/// Identity of a restaurant row: `name|address|city|state` after folding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(name: &str, address: &str, city: &str, state: &str) -> Self {
        let parts = [fold(name), fold(address), fold(city), fold(state)];
        DedupKey(parts.join("|"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A classified, normalized record ready for the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRestaurant {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: Option<String>,
    pub certifying_agency: String,
    pub classification: Classification,
    pub hours_of_operation: Option<String>,
    pub price_range: Option<String>,
    pub short_description: Option<String>,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    pub certificate_link: Option<String>,
    pub google_listing_url: Option<String>,
    pub source_url: String,
}

impl NewRestaurant {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.name, &self.address, &self.city, &self.state)
    }
}

/// A stored `restaurants` row.
#[derive(Debug, Clone, PartialEq)]
pub struct Restaurant {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: Option<String>,
    pub certifying_agency: String,
    pub kosher_category: KosherCategory,
    pub is_cholov_yisroel: Option<bool>,
    pub is_pas_yisroel: bool,
    pub listing_type: Option<String>,
    pub status: Status,
    pub hours_of_operation: Option<String>,
    pub price_range: Option<String>,
    pub short_description: Option<String>,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    pub certificate_link: Option<String>,
    pub google_listing_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
