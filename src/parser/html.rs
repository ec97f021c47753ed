use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::normalize::collapse_ws;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style|noscript|svg|template)\b[^>]*>.*?</(?:script|style|noscript|svg|template)\s*>")
        .unwrap()
});
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").unwrap());
static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());
static LINK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<link\b([^>]*)>").unwrap());
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
});
static REL_NEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\brel\s*=\s*["']?[^"'>]*\bnext\b"#).unwrap());
static CLASS_NEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\bclass\s*=\s*["'][^"']*\bnext\b"#).unwrap());
static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<br\s*/?>|</?(?:p|div|li|ul|ol|tr|td|th|table|section|article|header|footer|nav|aside|dl|dt|dd|address|main)\b[^>]*>",
    )
    .unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());

/// Flatten an HTML page into markdown-style lines: headings become `### text`,
/// anchors become `[text](url)` with absolute URLs, block elements become line
/// breaks, and everything else is reduced to its text.
pub fn html_to_lines(html: &str, base_url: &str) -> String {
    let s = COMMENT_RE.replace_all(html, "");
    let s = SCRIPT_RE.replace_all(&s, "");

    let s = HEADING_RE.replace_all(&s, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(3);
        let text = inline_text(&caps[2]);
        if text.is_empty() {
            "\n".to_string()
        } else {
            format!("\n{} {}\n", "#".repeat(level), text)
        }
    });

    let s = ANCHOR_RE.replace_all(&s, |caps: &Captures| {
        let text = inline_text(&caps[2]).replace(['[', ']'], "");
        match href_of(&caps[1]) {
            Some(href) if is_navigable(&href) => {
                let url = resolve_url(base_url, &href)
                    .replace(' ', "%20")
                    .replace(')', "%29");
                format!("[{}]({})", text, url)
            }
            // "Call" buttons carry the number only in the href
            Some(href)
                if href.to_lowercase().starts_with("tel:")
                    && !text.chars().any(|c| c.is_ascii_digit()) =>
            {
                href[4..].to_string()
            }
            _ => text,
        }
    });

    let s = BREAK_RE.replace_all(&s, "\n");
    let s = TAG_RE.replace_all(&s, "");
    let s = decode_entities(&s);

    let mut lines: Vec<String> = Vec::new();
    for line in s.lines() {
        let line = collapse_ws(line);
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Find the pagination link (`rel="next"` or a `next` class) and resolve it.
pub fn next_page_link(html: &str, base_url: &str) -> Option<String> {
    let anchors = ANCHOR_RE.captures_iter(html).map(|c| c.get(1).map_or("", |m| m.as_str()));
    let links = LINK_TAG_RE.captures_iter(html).map(|c| c.get(1).map_or("", |m| m.as_str()));
    links
        .chain(anchors)
        .find(|attrs| REL_NEXT_RE.is_match(attrs) || CLASS_NEXT_RE.is_match(attrs))
        .and_then(href_of)
        .filter(|href| is_navigable(href))
        .map(|href| resolve_url(base_url, &href))
        .filter(|url| url != base_url)
}

fn href_of(attrs: &str) -> Option<String> {
    let caps = HREF_RE.captures(attrs)?;
    let raw = caps.get(1).or(caps.get(2)).or(caps.get(3))?.as_str();
    let href = decode_entities(raw.trim());
    if href.is_empty() {
        None
    } else {
        Some(href)
    }
}

fn is_navigable(href: &str) -> bool {
    let lower = href.to_lowercase();
    !(lower.starts_with('#')
        || lower.starts_with("tel:")
        || lower.starts_with("mailto:")
        || lower.starts_with("javascript:"))
}

fn inline_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    collapse_ws(&decode_entities(&stripped))
}

/// Resolve `href` against the page URL. Bare `www.` hosts are external sites
/// and are returned unchanged.
pub fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    let lower = href.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{}", rest);
    }

    let origin = origin_of(base);
    if href.starts_with('/') {
        return format!("{}{}", origin, href);
    }

    let path = &base[origin.len()..];
    let path = path.split(['?', '#']).next().unwrap_or("");
    if href.starts_with('?') {
        return format!("{}{}{}", origin, path, href);
    }
    let dir = match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    };
    format!("{}{}{}", origin, dir, href)
}

fn origin_of(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return "";
    };
    let host_start = scheme_end + 3;
    match url[host_start..].find(['/', '?', '#']) {
        Some(idx) => &url[..host_start + idx],
        None => url,
    }
}

pub fn decode_entities(s: &str) -> String {
    ENTITY_RE
        .replace_all(s, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) =
                entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(entity)
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "raquo" => '»',
        "laquo" => '«',
        "rsaquo" => '›',
        "lsaquo" => '‹',
        "ndash" => '–',
        "mdash" => '—',
        "rsquo" => '’',
        "lsquo" => '‘',
        "rdquo" => '”',
        "ldquo" => '“',
        "hellip" => '…',
        "middot" => '·',
        "bull" => '•',
        "eacute" => 'é',
        "egrave" => 'è',
        "ntilde" => 'ñ',
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.orbkosher.com/category/restaurants/dairy/";

    #[test]
    fn headings_and_anchors() {
        let html = r#"<div><h3 class="title"><a href="/listing/cafe">Cafe  Noir</a></h3>
            <p>Visit <a href="https://cafenoir.com/">our site</a></p></div>"#;
        let out = html_to_lines(html, BASE);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "### Cafe Noir");
        assert!(lines.contains(&"Visit [our site](https://cafenoir.com/)"));
    }

    #[test]
    fn scripts_comments_and_entities_removed() {
        let html = "<script>var a = '<p>x</p>';</script><!-- hidden --><p>Restaurants &raquo; Dairy &amp; More&#8217;s</p>";
        assert_eq!(html_to_lines(html, BASE), "Restaurants » Dairy & More’s");
    }

    #[test]
    fn br_splits_lines_and_blank_runs_collapse() {
        let html = "<p>1 Main St<br/>Miami, FL 33101</p><p></p><p></p><p>done</p>";
        assert_eq!(html_to_lines(html, BASE), "1 Main St\nMiami, FL 33101\n\ndone");
    }

    #[test]
    fn tel_links_become_text() {
        let html = r#"<p>Phone: <a href="tel:3055551234">305-555-1234</a></p>"#;
        assert_eq!(html_to_lines(html, BASE), "Phone: 305-555-1234");
        let html = r#"<p><a class="btn" href="tel:+13055551234">Call</a></p>"#;
        assert_eq!(html_to_lines(html, BASE), "+13055551234");
    }

    #[test]
    fn resolves_relative_urls() {
        assert_eq!(resolve_url(BASE, "/certs/a.pdf"), "https://www.orbkosher.com/certs/a.pdf");
        assert_eq!(resolve_url(BASE, "page/2/"), format!("{}page/2/", BASE));
        assert_eq!(resolve_url(BASE, "//cdn.example.com/x"), "https://cdn.example.com/x");
        assert_eq!(resolve_url(BASE, "www.deli.com"), "www.deli.com");
        assert_eq!(
            resolve_url("https://orbkosher.com", "listing"),
            "https://orbkosher.com/listing"
        );
        assert_eq!(
            resolve_url("https://orbkosher.com/list?page=1", "?page=2"),
            "https://orbkosher.com/list?page=2"
        );
    }

    #[test]
    fn finds_next_page() {
        let html = r#"<nav><a class="page-numbers" href="/category/restaurants/dairy/">1</a>
            <a class="next page-numbers" href="/category/restaurants/dairy/page/2/">Next &raquo;</a></nav>"#;
        assert_eq!(
            next_page_link(html, BASE).as_deref(),
            Some("https://www.orbkosher.com/category/restaurants/dairy/page/2/")
        );
        let html = r#"<head><link rel="next" href="https://www.orbkosher.com/x/page/3/"></head>"#;
        assert_eq!(
            next_page_link(html, BASE).as_deref(),
            Some("https://www.orbkosher.com/x/page/3/")
        );
        assert_eq!(next_page_link("<p>no pages</p>", BASE), None);
    }

    #[test]
    fn numeric_entities() {
        assert_eq!(decode_entities("Jon&#39;s &#x26; Co&nbsp;"), "Jon's & Co ");
        assert_eq!(decode_entities("&bogus; &amp;amp;"), "&bogus; &amp;");
    }
}
