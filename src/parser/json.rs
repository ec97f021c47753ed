use serde_json::{Map, Value};

use super::ParseError;
use crate::models::RawListing;

const WRAPPER_KEYS: &[&str] = &["listings", "restaurants", "results", "data", "items"];

/// Parse a JSON listing endpoint. Accepts a bare array of objects or an
/// object wrapping one under a common key.
pub fn parse_json_listings(
    body: &str,
    default_category: &str,
    source_url: &str,
) -> Result<Vec<RawListing>, ParseError> {
    let value: Value = serde_json::from_str(body)?;
    let items = listing_array(&value).ok_or_else(|| {
        ParseError::Shape("expected an array of listings or an object wrapping one".into())
    })?;

    let listings = items
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| to_listing(obj, default_category, source_url))
        .collect();
    Ok(listings)
}

fn listing_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(obj) => WRAPPER_KEYS
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(listing_array),
        _ => None,
    }
}

fn to_listing(obj: &Map<String, Value>, default_category: &str, source_url: &str) -> RawListing {
    // nested { "address": { "street": .., "city": .. } } is flattened
    let address = obj.get("address").and_then(Value::as_object);
    let addr_field = |keys: &[&str]| address.and_then(|a| field(a, keys)).or_else(|| field(obj, keys));

    RawListing {
        name: field(obj, &["name", "title"]).unwrap_or_default(),
        street: address
            .and_then(|a| field(a, &["street", "line1", "address1"]))
            .or_else(|| field(obj, &["address", "street", "street_address"])),
        city: addr_field(&["city", "locality"]),
        state: addr_field(&["state", "region"]),
        zip: addr_field(&["zip", "zip_code", "postal_code", "zipcode"]),
        phone: field(obj, &["phone", "phone_number", "telephone"]),
        website: field(obj, &["website", "url", "web"]),
        certificate_link: field(obj, &["certificate", "certificate_link", "certificate_url"]),
        google_listing_url: field(obj, &["google_listing_url", "map_url", "maps_url"]),
        hours: field(obj, &["hours", "hours_of_operation"]),
        price_range: field(obj, &["price_range", "price"]),
        description: field(obj, &["description", "short_description"]),
        category: field(obj, &["category", "kosher_category", "type"])
            .or_else(|| Some(default_category.to_string())),
        certifying_agency: field(obj, &["certifying_agency", "agency"]),
        source_url: source_url.to_string(),
    }
}

/// First non-empty value under any of `keys`, numbers and booleans as text.
fn field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(parts) => {
            let joined: Vec<String> = parts
                .iter()
                .filter_map(|p| p.as_str().map(str::trim).filter(|s| !s.is_empty()).map(String::from))
                .collect();
            (!joined.is_empty()).then(|| joined.join("; "))
        }
        _ => None,
    })
}
