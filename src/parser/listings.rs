use std::sync::LazyLock;

use regex::Regex;

use super::blocks::Block;
use crate::models::RawListing;

static UNIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:suite|ste\.?|unit|apt\.?|#)\s*\S+$").unwrap());

/// Group blocks into listings. Every heading of level 2 or deeper opens a
/// listing; a level-1 heading (the page title) closes the current one. A
/// heading only becomes a listing if an address was found under it, which
/// drops navigation and footer headings.
pub fn extract_listings(blocks: &[Block], default_category: &str, source_url: &str) -> Vec<RawListing> {
    let page_category = blocks
        .iter()
        .find_map(|b| match b {
            Block::Breadcrumb(parts) => Some(parts.join(" » ")),
            _ => None,
        })
        .unwrap_or_else(|| default_category.to_string());

    let mut listings = Vec::new();
    let mut current: Option<Draft> = None;

    for block in blocks {
        match block {
            Block::Heading { level, text } if *level >= 2 => {
                if let Some(draft) = current.take() {
                    listings.extend(draft.finish(&page_category, source_url));
                }
                current = Some(Draft::new(text));
            }
            Block::Heading { .. } => {
                if let Some(draft) = current.take() {
                    listings.extend(draft.finish(&page_category, source_url));
                }
            }
            other => {
                if let Some(draft) = current.as_mut() {
                    draft.absorb(other, source_url);
                }
            }
        }
    }
    if let Some(draft) = current.take() {
        listings.extend(draft.finish(&page_category, source_url));
    }

    listings
}

#[derive(Default)]
struct Draft {
    listing: RawListing,
    description: Vec<String>,
    hours: Vec<String>,
    collecting_hours: bool,
    last_was_street: bool,
}

impl Draft {
    fn new(name: &str) -> Self {
        Draft {
            listing: RawListing {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn absorb(&mut self, block: &Block, source_url: &str) {
        let l = &mut self.listing;
        let was_street = std::mem::replace(&mut self.last_was_street, false);
        if !matches!(block, Block::Text(_) | Block::Empty) {
            self.collecting_hours = false;
        }

        match block {
            Block::Street(s) => {
                if l.street.is_none() {
                    l.street = Some(s.clone());
                    self.last_was_street = true;
                }
            }
            Block::Locality { city, state, zip } => {
                if l.city.is_none() {
                    l.city = Some(city.clone());
                    l.state = Some(state.clone());
                    l.zip = zip.clone();
                }
            }
            Block::Phone(p) => {
                l.phone.get_or_insert_with(|| p.clone());
            }
            Block::Link { text, url } => self.absorb_link(text, url, source_url),
            Block::Field { key, value } => self.absorb_field(key, value),
            Block::Text(t) => {
                if was_street && UNIT_RE.is_match(t) {
                    if let Some(street) = l.street.as_mut() {
                        street.push(' ');
                        street.push_str(t);
                    }
                    self.last_was_street = true;
                } else if self.collecting_hours {
                    self.hours.push(t.clone());
                } else {
                    self.description.push(t.clone());
                }
            }
            Block::Empty => {
                self.last_was_street = was_street;
            }
            Block::Heading { .. } | Block::Breadcrumb(_) => {}
        }
    }

    fn absorb_link(&mut self, text: &str, url: &str, source_url: &str) {
        let l = &mut self.listing;
        let lower_url = url.to_lowercase();
        let lower_text = text.to_lowercase();

        if is_map_link(&lower_url) {
            l.google_listing_url.get_or_insert_with(|| url.to_string());
        } else if lower_url.ends_with(".pdf")
            || lower_text.contains("certificate")
            || lower_text.contains("certification")
            || lower_text.contains("letter")
        {
            l.certificate_link.get_or_insert_with(|| url.to_string());
        } else if lower_text == "website" || lower_text == "web" || !same_host(url, source_url) {
            l.website.get_or_insert_with(|| url.to_string());
        }
    }

    fn absorb_field(&mut self, key: &str, value: &str) {
        let l = &mut self.listing;
        let value = value.trim();
        match key.to_lowercase().as_str() {
            "hours" | "hours of operation" | "opening hours" | "open" => {
                if value.is_empty() {
                    self.collecting_hours = true;
                } else {
                    self.hours.push(value.to_string());
                    self.collecting_hours = true;
                }
            }
            "category" | "kosher category" | "type" => set_once(&mut l.category, value),
            "agency" | "certified by" | "certification" | "certifying agency" | "hechsher"
            | "supervision" => set_once(&mut l.certifying_agency, value),
            "price" | "price range" => set_once(&mut l.price_range, value),
            "website" | "web" | "url" => set_once(&mut l.website, value),
            "city" => set_once(&mut l.city, value),
            "state" => set_once(&mut l.state, value),
            "zip" | "zip code" | "postal code" => set_once(&mut l.zip, value),
            "phone" | "tel" | "telephone" => set_once(&mut l.phone, value),
            _ if !value.is_empty() => self.description.push(format!("{}: {}", key, value)),
            _ => {}
        }
    }

    fn finish(mut self, page_category: &str, source_url: &str) -> Option<RawListing> {
        if self.listing.street.is_none() && self.listing.city.is_none() {
            return None;
        }
        if !self.hours.is_empty() {
            self.listing.hours = Some(self.hours.join("; "));
        }
        if !self.description.is_empty() {
            self.listing.description = Some(self.description.join(" "));
        }
        if self.listing.category.is_none() {
            self.listing.category = Some(page_category.to_string());
        }
        self.listing.source_url = source_url.to_string();
        Some(self.listing)
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

fn is_map_link(lower_url: &str) -> bool {
    lower_url.contains("google.com/maps")
        || lower_url.contains("maps.google.")
        || lower_url.contains("goo.gl/maps")
        || lower_url.contains("maps.app.goo.gl")
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    host.trim_start_matches("www.")
}

fn same_host(url: &str, source_url: &str) -> bool {
    host_of(url).eq_ignore_ascii_case(host_of(source_url))
}
