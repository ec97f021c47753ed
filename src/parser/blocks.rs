use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::normalize_state;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());
static SINGLE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^\]]*)\]\(([^)\s]+)\)$").unwrap());
static INLINE_LINKS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").unwrap());
static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Za-z /&]{1,28}):\s*(.*)$").unwrap());
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\+?1[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}(?:\s*(?:x|ext\.?)\s*\d+)?$")
        .unwrap()
});
static STREET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[A-Za-z]?(?:-\d+)?\s+[A-Za-z0-9]").unwrap());
static STATE_ZIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z .]*?)\.?(?:\s+(\d{5}(?:-\d{4})?))?$").unwrap()
});
static CITY_STATE_ZIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z .'-]*?)\s+([A-Za-z]{2})\.?\s+(\d{5}(?:-\d{4})?)$").unwrap()
});
static MARKDOWN_EMPHASIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[*_]+|[*_]+$").unwrap());

const PHONE_KEYS: &[&str] = &["phone", "tel", "telephone", "ph", "phone number"];
const ADDRESS_KEYS: &[&str] = &["address", "location"];

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, text: String },
    Link { text: String, url: String },
    Breadcrumb(Vec<String>),
    Field { key: String, value: String },
    Phone(String),
    Street(String),
    Locality {
        city: String,
        state: String,
        zip: Option<String>,
    },
    Text(String),
    Empty,
}

/// Classify markdown-style lines (as produced by `html::html_to_lines` or
/// returned by spider) into blocks, one or more per line.
pub fn classify_lines(markdown: &str) -> Vec<Block> {
    if markdown.trim().is_empty() {
        return vec![Block::Empty];
    }

    let mut blocks = Vec::new();
    for raw in markdown.lines() {
        let line = raw.trim();

        if line.is_empty() {
            blocks.push(Block::Empty);
            continue;
        }

        // ── Heading: ### text ──
        if let Some(caps) = HEADING_RE.captures(line) {
            let text = strip_emphasis(&link_text_only(&caps[2]));
            if !text.is_empty() {
                blocks.push(Block::Heading {
                    level: caps[1].len() as u8,
                    text,
                });
            }
            continue;
        }

        // ── Single link on the line ──
        if let Some(caps) = SINGLE_LINK_RE.captures(line) {
            emit_link(&caps[1], &caps[2], &mut blocks);
            continue;
        }

        // ── Key: value ──
        if let Some(caps) = FIELD_RE.captures(line) {
            classify_field(caps[1].trim(), caps[2].trim(), &mut blocks);
            continue;
        }

        // ── Breadcrumb: Home » Restaurants » Dairy ──
        if let Some(parts) = breadcrumb_parts(line) {
            blocks.push(Block::Breadcrumb(parts));
            continue;
        }

        let plain = strip_emphasis(line);

        if PHONE_RE.is_match(&plain) {
            blocks.push(Block::Phone(plain));
            continue;
        }

        if push_address(&plain, &mut blocks) {
            continue;
        }

        // ── Several inline links: [a](x) | [b](y) ──
        if line.contains("](") {
            for caps in INLINE_LINKS_RE.captures_iter(line) {
                emit_link(&caps[1], &caps[2], &mut blocks);
            }
            let rest = INLINE_LINKS_RE.replace_all(line, " ");
            let rest = rest.trim_matches(|c: char| c.is_whitespace() || "|·•-".contains(c));
            if !rest.is_empty() {
                blocks.push(Block::Text(rest.to_string()));
            }
            continue;
        }

        blocks.push(Block::Text(plain));
    }

    blocks
}

fn classify_field(key: &str, value: &str, blocks: &mut Vec<Block>) {
    let lower = key.to_lowercase();

    // "Website: [hollywooddeli.com](https://...)": the key names the link
    if INLINE_LINKS_RE.is_match(value) {
        for caps in INLINE_LINKS_RE.captures_iter(value) {
            if lower.starts_with("phone") || lower == "tel" {
                blocks.push(Block::Phone(caps[1].to_string()));
            } else {
                emit_link(key, &caps[2], blocks);
            }
        }
        return;
    }

    if PHONE_KEYS.contains(&lower.as_str()) && PHONE_RE.is_match(value) {
        blocks.push(Block::Phone(value.to_string()));
        return;
    }

    if ADDRESS_KEYS.contains(&lower.as_str()) && !value.is_empty() {
        if !push_address(value, blocks) {
            blocks.push(Block::Street(value.to_string()));
        }
        return;
    }

    blocks.push(Block::Field {
        key: key.to_string(),
        value: value.to_string(),
    });
}

/// Recognize "street, city, ST zip", "city, ST zip", "city ST zip" and a bare
/// street line. Returns false when the line is none of those.
fn push_address(line: &str, blocks: &mut Vec<Block>) -> bool {
    let parts: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() >= 2 {
        let last = parts[parts.len() - 1];
        if let Some((state, zip)) = state_and_zip(last) {
            let city = parts[parts.len() - 2];
            let street = parts[..parts.len() - 2].join(", ");
            if !city.chars().any(|c| c.is_ascii_digit()) {
                if !street.is_empty() {
                    if !STREET_RE.is_match(&street) {
                        return false;
                    }
                    blocks.push(Block::Street(street));
                }
                blocks.push(Block::Locality {
                    city: city.to_string(),
                    state,
                    zip,
                });
                return true;
            }
        }

        if let Some(caps) = CITY_STATE_ZIP_RE.captures(last) {
            if normalize_state(&caps[2]).is_ok() {
                let street = parts[..parts.len() - 1].join(", ");
                if !STREET_RE.is_match(&street) {
                    return false;
                }
                blocks.push(Block::Street(street));
                blocks.push(Block::Locality {
                    city: caps[1].to_string(),
                    state: caps[2].to_string(),
                    zip: Some(caps[3].to_string()),
                });
                return true;
            }
        }
    } else if let Some(caps) = CITY_STATE_ZIP_RE.captures(line) {
        if normalize_state(&caps[2]).is_ok() {
            blocks.push(Block::Locality {
                city: caps[1].to_string(),
                state: caps[2].to_string(),
                zip: Some(caps[3].to_string()),
            });
            return true;
        }
    }

    if STREET_RE.is_match(line)
        && !line.contains(':')
        && !PHONE_RE.is_match(line)
        && line.split_whitespace().count() >= 2
    {
        blocks.push(Block::Street(line.to_string()));
        return true;
    }

    false
}

fn state_and_zip(part: &str) -> Option<(String, Option<String>)> {
    let caps = STATE_ZIP_RE.captures(part)?;
    let state = caps[1].trim();
    normalize_state(state).ok()?;
    Some((state.to_string(), caps.get(2).map(|m| m.as_str().to_string())))
}

fn breadcrumb_parts(line: &str) -> Option<Vec<String>> {
    if !line.contains(['»', '›']) && !line.contains(" > ") {
        return None;
    }
    let text = link_text_only(line).replace(" > ", " » ");
    let parts: Vec<String> = text
        .split(['»', '›'])
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("home"))
        .collect();
    let segments = text.split(['»', '›']).filter(|p| !p.trim().is_empty()).count();
    if segments >= 2 && !parts.is_empty() {
        Some(parts)
    } else {
        None
    }
}

fn emit_link(text: &str, url: &str, blocks: &mut Vec<Block>) {
    let lower = url.to_lowercase();
    if let Some(number) = lower.strip_prefix("tel:") {
        let shown = if PHONE_RE.is_match(text.trim()) { text.trim() } else { number };
        blocks.push(Block::Phone(shown.to_string()));
    } else if lower.starts_with("mailto:") || lower.starts_with("javascript:") {
        if !text.trim().is_empty() {
            blocks.push(Block::Text(text.trim().to_string()));
        }
    } else {
        blocks.push(Block::Link {
            text: text.trim().to_string(),
            url: url.to_string(),
        });
    }
}

/// `[Home](/) » [Restaurants](/r) » Dairy` → `Home » Restaurants » Dairy`
fn link_text_only(s: &str) -> String {
    INLINE_LINKS_RE.replace_all(s, "$1").trim().to_string()
}

fn strip_emphasis(s: &str) -> String {
    MARKDOWN_EMPHASIS_RE.replace_all(s.trim(), "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading() {
        let blocks = classify_lines("### [Hollywood Deli](https://orbkosher.com/l/1)");
        assert_eq!(
            blocks[0],
            Block::Heading { level: 3, text: "Hollywood Deli".into() }
        );
    }

    #[test]
    fn breadcrumb_drops_home() {
        let blocks = classify_lines("[Home](https://orbkosher.com/) » [Restaurants](https://orbkosher.com/r) » Dairy");
        assert_eq!(
            blocks[0],
            Block::Breadcrumb(vec!["Restaurants".into(), "Dairy".into()])
        );
    }

    #[test]
    fn single_segment_is_not_breadcrumb() {
        let blocks = classify_lines("[Next »](https://orbkosher.com/page/2/)");
        assert!(matches!(&blocks[0], Block::Link { .. }));
    }

    #[test]
    fn full_address_line() {
        let blocks = classify_lines("4000 N. 46th Ave, Hollywood, FL 33021");
        assert_eq!(blocks[0], Block::Street("4000 N. 46th Ave".into()));
        assert_eq!(
            blocks[1],
            Block::Locality { city: "Hollywood".into(), state: "FL".into(), zip: Some("33021".into()) }
        );
    }

    #[test]
    fn locality_variants() {
        let blocks = classify_lines("Miami Beach, Florida\nHollywood FL 33021");
        assert_eq!(
            blocks[0],
            Block::Locality { city: "Miami Beach".into(), state: "Florida".into(), zip: None }
        );
        assert_eq!(
            blocks[1],
            Block::Locality { city: "Hollywood".into(), state: "FL".into(), zip: Some("33021".into()) }
        );
    }

    #[test]
    fn comma_text_is_not_address() {
        let blocks = classify_lines("Meat, Dairy\nOpen daily, closed Shabbos");
        assert!(matches!(&blocks[0], Block::Text(_)));
        assert!(matches!(&blocks[1], Block::Text(_)));
    }

    #[test]
    fn phones() {
        let blocks = classify_lines("(954) 555-1234\nPhone: 305.555.0000\n[Call](tel:+13055550001)");
        assert_eq!(blocks[0], Block::Phone("(954) 555-1234".into()));
        assert_eq!(blocks[1], Block::Phone("305.555.0000".into()));
        assert_eq!(blocks[2], Block::Phone("+13055550001".into()));
    }

    #[test]
    fn field_with_link_names_the_link() {
        let blocks = classify_lines("Website: [deli.com](https://deli.com)");
        assert_eq!(
            blocks[0],
            Block::Link { text: "Website".into(), url: "https://deli.com".into() }
        );
    }

    #[test]
    fn hours_field() {
        let blocks = classify_lines("Hours: Sun-Thu 11:00am - 9:00pm");
        assert_eq!(
            blocks[0],
            Block::Field { key: "Hours".into(), value: "Sun-Thu 11:00am - 9:00pm".into() }
        );
    }

    #[test]
    fn address_field() {
        let blocks = classify_lines("Address: 2600 Hollywood Blvd, Hollywood, FL 33020");
        assert_eq!(blocks[0], Block::Street("2600 Hollywood Blvd".into()));
        assert!(matches!(&blocks[1], Block::Locality { city, .. } if city == "Hollywood"));
    }

    #[test]
    fn inline_links_split() {
        let blocks = classify_lines("[Menu](https://a.com/menu) | [Map](https://maps.google.com/?q=1)");
        let links: Vec<_> = blocks.iter().filter(|b| matches!(b, Block::Link { .. })).collect();
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn emphasis_stripped_from_text() {
        let blocks = classify_lines("**Now open Motzei Shabbos**");
        assert_eq!(blocks[0], Block::Text("Now open Motzei Shabbos".into()));
    }

    #[test]
    fn empty_string() {
        let blocks = classify_lines("");
        assert_eq!(blocks, vec![Block::Empty]);
    }
}
