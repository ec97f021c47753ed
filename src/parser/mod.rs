pub mod blocks;
pub mod html;
pub mod json;
pub mod listings;

use thiserror::Error;

use crate::fetch::{Page, PageFormat};
use crate::models::RawListing;
use crate::normalize::fold;
use blocks::Block;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected page structure: {0}")]
    Shape(String),
}

/// Listings found on one page, plus the next page of the same category.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub listings: Vec<RawListing>,
    pub next_page: Option<String>,
}

/// Two passes for HTML and markdown: lines → blocks → listings. JSON pages
/// map object fields directly.
pub fn parse_page(page: &Page, default_category: &str) -> Result<ParsedPage, ParseError> {
    let parsed = match page.format {
        PageFormat::Json => ParsedPage {
            listings: json::parse_json_listings(&page.body, default_category, &page.url)?,
            next_page: json_next_page(&page.body, &page.url),
        },
        PageFormat::Html => {
            let lines = html::html_to_lines(&page.body, &page.url);
            let blocks = blocks::classify_lines(&lines);
            ParsedPage {
                listings: listings::extract_listings(&blocks, default_category, &page.url),
                next_page: html::next_page_link(&page.body, &page.url),
            }
        }
        PageFormat::Markdown => {
            let blocks = blocks::classify_lines(&page.body);
            ParsedPage {
                listings: listings::extract_listings(&blocks, default_category, &page.url),
                next_page: markdown_next_page(&blocks, &page.url),
            }
        }
    };

    if parsed.listings.is_empty() && parsed.next_page.is_none() {
        return Err(ParseError::Shape("no listings found".into()));
    }
    Ok(parsed)
}

fn markdown_next_page(blocks: &[Block], current: &str) -> Option<String> {
    blocks.iter().find_map(|b| match b {
        Block::Link { text, url } if is_next_label(text) && url != current => Some(url.clone()),
        _ => None,
    })
}

fn is_next_label(text: &str) -> bool {
    let t = text.trim();
    matches!(t, "»" | "›" | "→") || fold(t).starts_with("next")
}

fn json_next_page(body: &str, current: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let next = value.get("next").or_else(|| value.pointer("/links/next"))?.as_str()?;
    let next = html::resolve_url(current, next);
    (next != current).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {}", path, e))
    }

    fn page(url: &str, body: String, format: PageFormat) -> Page {
        Page {
            url: url.to_string(),
            body,
            format,
        }
    }

    #[test]
    fn html_category_page() {
        let p = page(
            "https://www.orbkosher.com/category/restaurants/dairy/",
            fixture("orb_dairy.html"),
            PageFormat::Html,
        );
        let parsed = parse_page(&p, "Dairy").unwrap();
        let names: Vec<&str> = parsed.listings.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["Hollywood Deli", "Cafe Noir", "Mizrachi's Pizza in Hollywood"]);

        let deli = &parsed.listings[0];
        assert_eq!(deli.category.as_deref(), Some("Restaurants » Dairy"));
        assert_eq!(deli.street.as_deref(), Some("4000 N. 46th Ave"));
        assert_eq!(deli.city.as_deref(), Some("Hollywood"));
        assert_eq!(deli.phone.as_deref(), Some("(954) 555-1234"));
        assert_eq!(deli.website.as_deref(), Some("www.hollywooddeli.com"));
        assert_eq!(
            deli.certificate_link.as_deref(),
            Some("https://www.orbkosher.com/wp-content/uploads/hollywood-deli.pdf")
        );

        assert_eq!(
            parsed.next_page.as_deref(),
            Some("https://www.orbkosher.com/category/restaurants/dairy/page/2/")
        );
    }

    #[test]
    fn last_html_page_has_no_next() {
        let p = page(
            "https://www.orbkosher.com/category/restaurants/dairy/page/2/",
            fixture("orb_dairy_page2.html"),
            PageFormat::Html,
        );
        let parsed = parse_page(&p, "Dairy").unwrap();
        assert_eq!(parsed.listings.len(), 1);
        assert_eq!(parsed.listings[0].name, "Sobol Boynton Beach");
        assert_eq!(parsed.next_page, None);
    }

    #[test]
    fn markdown_page_from_spider() {
        let p = page(
            "https://www.orbkosher.com/category/restaurants/meat/",
            fixture("orb_meat.md"),
            PageFormat::Markdown,
        );
        let parsed = parse_page(&p, "Meat").unwrap();
        assert_eq!(parsed.listings.len(), 2);
        assert_eq!(parsed.listings[0].name, "Fleisch 41");
        assert_eq!(parsed.listings[0].category.as_deref(), Some("Restaurants » Meat"));
        assert_eq!(parsed.listings[1].name, "Grill Time");
        assert_eq!(
            parsed.next_page.as_deref(),
            Some("https://www.orbkosher.com/category/restaurants/meat/page/2/")
        );
    }

    #[test]
    fn json_page() {
        let p = page(
            "https://www.orbkosher.com/api/listings?cat=fish",
            fixture("listings.json"),
            PageFormat::Json,
        );
        let parsed = parse_page(&p, "Restaurants » Fish").unwrap();
        assert_eq!(parsed.listings.len(), 2);
        assert_eq!(parsed.next_page, None);
    }

    #[test]
    fn page_without_listings_is_a_parse_error() {
        let p = page(
            "https://www.orbkosher.com/",
            "<html><body><h1>Welcome</h1><p>Nothing here</p></body></html>".into(),
            PageFormat::Html,
        );
        assert!(matches!(parse_page(&p, "Dairy"), Err(ParseError::Shape(_))));
    }
}
