use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::models::{Classification, NewRestaurant, RawListing};

static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:ext\.?|extension|x)\s*\d{1,6}\s*$").unwrap());
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{5})(?:[-\s]?(\d{4}))?$").unwrap());
static WEBSITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,24}(?::\d{1,5})?(?:[/?#]\S*)?$",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("empty street address")]
    EmptyAddress,
    #[error("missing city")]
    MissingCity,
    #[error("unrecognized state '{0}'")]
    State(String),
    #[error("unparseable phone number '{0}'")]
    Phone(String),
    #[error("invalid website '{0}'")]
    Website(String),
}

// ── Keys ──

/// Fold a string for identity comparisons: lower-case, punctuation dropped,
/// whitespace collapsed. "Jon's  Place" and "jons place" fold alike.
pub fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '/' {
            out.push(' ');
        }
    }
    collapse_ws(&out)
}

pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Address ──

const STREET_SUFFIXES: &[(&str, &str)] = &[
    ("st", "Street"),
    ("str", "Street"),
    ("ave", "Avenue"),
    ("av", "Avenue"),
    ("blvd", "Boulevard"),
    ("rd", "Road"),
    ("dr", "Drive"),
    ("ln", "Lane"),
    ("ct", "Court"),
    ("pl", "Place"),
    ("pkwy", "Parkway"),
    ("hwy", "Highway"),
    ("ter", "Terrace"),
    ("terr", "Terrace"),
    ("cir", "Circle"),
    ("sq", "Square"),
    ("trl", "Trail"),
    ("expy", "Expressway"),
    ("cswy", "Causeway"),
];

const DIRECTIONALS: &[&str] = &["n", "s", "e", "w", "ne", "nw", "se", "sw"];

const UNIT_DESIGNATORS: &[(&str, &str)] = &[
    ("ste", "Suite"),
    ("suite", "Suite"),
    ("unit", "Unit"),
    ("apt", "Apt"),
    ("apartment", "Apt"),
    ("bldg", "Building"),
];

/// Canonicalize a street line. Suffix abbreviations are expanded only in
/// suffix position (last word, or followed by a unit or directional), so
/// "St. Andrews Ave" becomes "St. Andrews Avenue".
pub fn normalize_street(raw: &str) -> Result<String, NormalizeError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(NormalizeError::EmptyAddress);
    }

    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for (i, token) in tokens.iter().enumerate() {
        let comma = token.ends_with(',') && i + 1 < tokens.len();
        let core = token.trim_end_matches([',', '.', ';']);
        let lower = core.to_lowercase();

        let word = if let Some(unit) = lookup(UNIT_DESIGNATORS, &lower) {
            unit.to_string()
        } else if DIRECTIONALS.contains(&lower.as_str()) {
            core.to_uppercase()
        } else if i > 0 && in_suffix_position(&tokens, i) {
            match lookup(STREET_SUFFIXES, &lower) {
                Some(full) => full.to_string(),
                None => core.to_string(),
            }
        } else if core.is_empty() {
            continue;
        } else {
            // keep abbreviation periods that are not suffixes ("St. Andrews")
            token.trim_end_matches([',', ';']).to_string()
        };

        if comma {
            out.push(format!("{},", word));
        } else {
            out.push(word);
        }
    }

    let joined = out.join(" ");
    let trimmed = joined.trim_end_matches([',', ';', '.', ' ']).to_string();
    if trimmed.is_empty() {
        return Err(NormalizeError::EmptyAddress);
    }
    Ok(trimmed)
}

fn in_suffix_position(tokens: &[&str], i: usize) -> bool {
    let Some(next) = tokens.get(i + 1) else {
        return true;
    };
    if tokens[i].ends_with(',') || next.starts_with('#') {
        return true;
    }
    let next = next.trim_end_matches([',', '.', ';']).to_lowercase();
    DIRECTIONALS.contains(&next.as_str()) || lookup(UNIT_DESIGNATORS, &next).is_some()
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

pub fn normalize_city(raw: &str) -> Result<String, NormalizeError> {
    let city = collapse_ws(raw.trim_matches([',', '.', ' ']));
    if city.is_empty() {
        Err(NormalizeError::MissingCity)
    } else {
        Ok(city)
    }
}

const US_STATES: &[(&str, &str)] = &[
    ("AL", "alabama"),
    ("AK", "alaska"),
    ("AZ", "arizona"),
    ("AR", "arkansas"),
    ("CA", "california"),
    ("CO", "colorado"),
    ("CT", "connecticut"),
    ("DE", "delaware"),
    ("DC", "district of columbia"),
    ("FL", "florida"),
    ("GA", "georgia"),
    ("HI", "hawaii"),
    ("ID", "idaho"),
    ("IL", "illinois"),
    ("IN", "indiana"),
    ("IA", "iowa"),
    ("KS", "kansas"),
    ("KY", "kentucky"),
    ("LA", "louisiana"),
    ("ME", "maine"),
    ("MD", "maryland"),
    ("MA", "massachusetts"),
    ("MI", "michigan"),
    ("MN", "minnesota"),
    ("MS", "mississippi"),
    ("MO", "missouri"),
    ("MT", "montana"),
    ("NE", "nebraska"),
    ("NV", "nevada"),
    ("NH", "new hampshire"),
    ("NJ", "new jersey"),
    ("NM", "new mexico"),
    ("NY", "new york"),
    ("NC", "north carolina"),
    ("ND", "north dakota"),
    ("OH", "ohio"),
    ("OK", "oklahoma"),
    ("OR", "oregon"),
    ("PA", "pennsylvania"),
    ("PR", "puerto rico"),
    ("RI", "rhode island"),
    ("SC", "south carolina"),
    ("SD", "south dakota"),
    ("TN", "tennessee"),
    ("TX", "texas"),
    ("UT", "utah"),
    ("VT", "vermont"),
    ("VA", "virginia"),
    ("WA", "washington"),
    ("WV", "west virginia"),
    ("WI", "wisconsin"),
    ("WY", "wyoming"),
];

/// AP-style abbreviations, folded and without periods.
const STATE_ALIASES: &[(&str, &str)] = &[
    ("ala", "AL"),
    ("ariz", "AZ"),
    ("ark", "AR"),
    ("calif", "CA"),
    ("cal", "CA"),
    ("colo", "CO"),
    ("conn", "CT"),
    ("del", "DE"),
    ("fla", "FL"),
    ("ill", "IL"),
    ("ind", "IN"),
    ("kan", "KS"),
    ("kans", "KS"),
    ("mass", "MA"),
    ("mich", "MI"),
    ("minn", "MN"),
    ("miss", "MS"),
    ("mont", "MT"),
    ("neb", "NE"),
    ("nebr", "NE"),
    ("nev", "NV"),
    ("okla", "OK"),
    ("ore", "OR"),
    ("penn", "PA"),
    ("tenn", "TN"),
    ("tex", "TX"),
    ("wash", "WA"),
    ("wva", "WV"),
    ("wis", "WI"),
    ("wisc", "WI"),
    ("wyo", "WY"),
];

pub fn normalize_state(raw: &str) -> Result<String, NormalizeError> {
    let trimmed = raw.trim().trim_end_matches('.');
    let upper = trimmed.to_uppercase();
    if let Some((code, _)) = US_STATES.iter().find(|(code, _)| *code == upper) {
        return Ok(code.to_string());
    }
    let folded = fold(trimmed);
    if let Some((code, _)) = US_STATES.iter().find(|(_, name)| *name == folded) {
        return Ok(code.to_string());
    }
    // "N.Y.", "W. Va.", "Fla."
    let compact = folded.replace(' ', "");
    US_STATES
        .iter()
        .map(|(code, _)| (code.to_lowercase(), *code))
        .find(|(lower, _)| *lower == compact)
        .map(|(_, code)| code)
        .or_else(|| STATE_ALIASES.iter().find(|(alias, _)| *alias == compact).map(|(_, code)| *code))
        .map(str::to_string)
        .ok_or_else(|| NormalizeError::State(raw.trim().to_string()))
}

pub fn normalize_zip(raw: &str) -> Option<String> {
    let caps = ZIP_RE.captures(raw.trim())?;
    match caps.get(2) {
        Some(plus4) => Some(format!("{}-{}", &caps[1], plus4.as_str())),
        None => Some(caps[1].to_string()),
    }
}

// ── Phone ──

/// `(XXX) XXX-XXXX` for 10 digits, `+1 (XXX) XXX-XXXX` for 11 digits with a
/// leading country code. Extensions are dropped.
pub fn normalize_phone(raw: &str) -> Result<String, NormalizeError> {
    let main = EXTENSION_RE.replace(raw.trim(), "");
    let digits: String = main.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Ok(format!(
            "({}) {}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..10]
        )),
        11 if digits.starts_with('1') => Ok(format!(
            "+1 ({}) {}-{}",
            &digits[1..4],
            &digits[4..7],
            &digits[7..11]
        )),
        _ => Err(NormalizeError::Phone(raw.trim().to_string())),
    }
}

// ── Website ──

/// Returns `Ok(None)` for an empty value and `Err` for anything that does not
/// validate as an http(s) URL after adding a scheme.
pub fn normalize_website(raw: &str) -> Result<Option<String>, NormalizeError> {
    let trimmed = raw.trim().trim_matches(['<', '>']);
    if trimmed.is_empty() {
        return Ok(None);
    }
    let invalid = || NormalizeError::Website(trimmed.to_string());

    let lower = trimmed.to_lowercase();
    let (scheme, rest) = if lower.starts_with("https://") {
        ("https://", &trimmed[8..])
    } else if lower.starts_with("http://") {
        ("http://", &trimmed[7..])
    } else if trimmed.contains("://") || trimmed.contains(char::is_whitespace) {
        return Err(invalid());
    } else {
        ("https://", trimmed)
    };

    let split = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (host, tail) = rest.split_at(split);
    let url = format!("{}{}{}", scheme, host.to_lowercase(), tail);
    let url = url.trim_end_matches('/').to_string();

    if WEBSITE_RE.is_match(&url) {
        Ok(Some(url))
    } else {
        Err(invalid())
    }
}

// ── Record ──

/// Normalize a raw listing into a loadable record. Address problems reject
/// the record; bad phones and websites are logged and stored as null.
pub fn normalize_listing(
    raw: &RawListing,
    classification: Classification,
    default_agency: &str,
) -> Result<NewRestaurant, NormalizeError> {
    let address = normalize_street(raw.street.as_deref().unwrap_or(""))?;
    let city = normalize_city(raw.city.as_deref().unwrap_or(""))?;
    let state = normalize_state(raw.state.as_deref().unwrap_or(""))?;

    let phone_number = raw.phone.as_deref().and_then(|p| match normalize_phone(p) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(name = %raw.name, address = %address, "Dropping phone: {}", e);
            None
        }
    });

    let website = optional_url(raw, "website", raw.website.as_deref());
    let google_listing_url = optional_url(raw, "google listing", raw.google_listing_url.as_deref());
    let certificate_link = optional_url(raw, "certificate", raw.certificate_link.as_deref());

    let certifying_agency = raw
        .certifying_agency
        .as_deref()
        .map(collapse_ws)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| default_agency.to_string());

    Ok(NewRestaurant {
        name: collapse_ws(&raw.name),
        address,
        city,
        state,
        zip_code: raw.zip.as_deref().and_then(normalize_zip),
        certifying_agency,
        classification,
        hours_of_operation: non_empty(raw.hours.as_deref()),
        price_range: non_empty(raw.price_range.as_deref()),
        short_description: non_empty(raw.description.as_deref()),
        phone_number,
        website,
        certificate_link,
        google_listing_url,
        source_url: raw.source_url.clone(),
    })
}

fn optional_url(raw: &RawListing, field: &str, value: Option<&str>) -> Option<String> {
    match normalize_website(value?) {
        Ok(url) => url,
        Err(e) => {
            warn!(name = %raw.name, field, "Dropping {}", e);
            None
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(collapse_ws).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KosherCategory;

    #[test]
    fn fold_strips_case_and_punctuation() {
        assert_eq!(fold("Jon's  Place"), "jons place");
        assert_eq!(fold("Holy Smokes BBQ & Grill"), "holy smokes bbq grill");
        assert_eq!(fold("Sobol - Boynton Beach"), "sobol boynton beach");
    }

    #[test]
    fn street_suffix_expanded_at_end() {
        assert_eq!(normalize_street("123 Main St.").unwrap(), "123 Main Street");
        assert_eq!(normalize_street("4000 N. 46th Ave").unwrap(), "4000 N 46th Avenue");
        assert_eq!(
            normalize_street("2600  Hollywood Blvd.,").unwrap(),
            "2600 Hollywood Boulevard"
        );
    }

    #[test]
    fn street_suffix_before_unit_and_directional() {
        assert_eq!(
            normalize_street("18090 Collins Ave Ste 4").unwrap(),
            "18090 Collins Avenue Suite 4"
        );
        assert_eq!(
            normalize_street("9491 Harding Ave., #101").unwrap(),
            "9491 Harding Avenue, #101"
        );
        assert_eq!(
            normalize_street("1400 NE 163rd St NW").unwrap(),
            "1400 NE 163rd Street NW"
        );
    }

    #[test]
    fn street_name_abbreviation_left_alone() {
        assert_eq!(
            normalize_street("500 St. Andrews Blvd").unwrap(),
            "500 St. Andrews Boulevard"
        );
        assert_eq!(
            normalize_street("12 Dr Martin Luther King Jr Blvd").unwrap(),
            "12 Dr Martin Luther King Jr Boulevard"
        );
    }

    #[test]
    fn street_normalization_is_idempotent() {
        for raw in ["123 Main St.", "18090 Collins Ave Ste 4", "9491 Harding Ave., #101"] {
            let once = normalize_street(raw).unwrap();
            assert_eq!(normalize_street(&once).unwrap(), once);
        }
    }

    #[test]
    fn empty_street_rejected() {
        assert_eq!(normalize_street("   "), Err(NormalizeError::EmptyAddress));
        assert_eq!(normalize_street(" , ."), Err(NormalizeError::EmptyAddress));
    }

    #[test]
    fn state_codes_and_names() {
        assert_eq!(normalize_state("fl").unwrap(), "FL");
        assert_eq!(normalize_state("Florida").unwrap(), "FL");
        assert_eq!(normalize_state("new  york").unwrap(), "NY");
        assert!(matches!(normalize_state("Narnia"), Err(NormalizeError::State(_))));
    }

    #[test]
    fn state_abbreviations() {
        assert_eq!(normalize_state("Fla.").unwrap(), "FL");
        assert_eq!(normalize_state("Fla").unwrap(), "FL");
        assert_eq!(normalize_state("N.Y.").unwrap(), "NY");
        assert_eq!(normalize_state("W. Va.").unwrap(), "WV");
        assert_eq!(normalize_state("Calif.").unwrap(), "CA");
        assert!(normalize_state("Flor").is_err());
    }

    #[test]
    fn zip_formats() {
        assert_eq!(normalize_zip("33021").as_deref(), Some("33021"));
        assert_eq!(normalize_zip("33021 1234").as_deref(), Some("33021-1234"));
        assert_eq!(normalize_zip("3302"), None);
    }

    #[test]
    fn phone_formats() {
        assert_eq!(normalize_phone("305.555.1234").unwrap(), "(305) 555-1234");
        assert_eq!(normalize_phone("1-954-555-0000").unwrap(), "+1 (954) 555-0000");
        assert_eq!(normalize_phone("(786) 555 0199 ext. 12").unwrap(), "(786) 555-0199");
        assert!(matches!(normalize_phone("555-1234"), Err(NormalizeError::Phone(_))));
    }

    #[test]
    fn phone_normalization_is_idempotent() {
        for raw in ["305.555.1234", "1 954 555 0000"] {
            let once = normalize_phone(raw).unwrap();
            assert_eq!(normalize_phone(&once).unwrap(), once);
        }
    }

    #[test]
    fn website_gets_scheme_and_loses_trailing_slash() {
        assert_eq!(
            normalize_website("www.HollywoodDeli.com/").unwrap().as_deref(),
            Some("https://www.hollywooddeli.com")
        );
        assert_eq!(
            normalize_website("HTTP://Example.com/Menu/").unwrap().as_deref(),
            Some("http://example.com/Menu")
        );
        assert_eq!(normalize_website("  ").unwrap(), None);
    }

    #[test]
    fn malformed_website_rejected() {
        assert!(matches!(
            normalize_website("www.example_restaurant"),
            Err(NormalizeError::Website(_))
        ));
        assert!(normalize_website("ftp://example.com").is_err());
        assert!(normalize_website("call us").is_err());
    }

    #[test]
    fn website_normalization_is_idempotent() {
        for raw in ["www.hollywooddeli.com/", "https://fleisch41.com/menu/", "http://a.b.co?x=1"] {
            let once = normalize_website(raw).unwrap().unwrap();
            assert_eq!(normalize_website(&once).unwrap().as_deref(), Some(once.as_str()));
        }
    }

    fn classification() -> Classification {
        Classification {
            kosher_category: KosherCategory::Meat,
            is_cholov_yisroel: None,
            is_pas_yisroel: false,
        }
    }

    #[test]
    fn listing_keeps_record_with_bad_contact_fields() {
        let raw = RawListing {
            name: "Fleisch  41".into(),
            street: Some("41 Main St.".into()),
            city: Some("Miami".into()),
            state: Some("fl".into()),
            zip: Some("33101".into()),
            phone: Some("555-12".into()),
            website: Some("www.example_restaurant".into()),
            source_url: "https://orbkosher.com/category/restaurants/meat".into(),
            ..Default::default()
        };
        let rec = normalize_listing(&raw, classification(), "ORB").unwrap();
        assert_eq!(rec.name, "Fleisch 41");
        assert_eq!(rec.address, "41 Main Street");
        assert_eq!(rec.state, "FL");
        assert_eq!(rec.certifying_agency, "ORB");
        assert_eq!(rec.phone_number, None);
        assert_eq!(rec.website, None);
    }

    #[test]
    fn listing_without_city_rejected() {
        let raw = RawListing {
            name: "Nowhere Grill".into(),
            street: Some("1 Main St".into()),
            state: Some("FL".into()),
            ..Default::default()
        };
        assert_eq!(
            normalize_listing(&raw, classification(), "ORB"),
            Err(NormalizeError::MissingCity)
        );
    }
}
