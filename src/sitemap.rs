use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use quick_xml::events::Event;
use regex::Regex;
use tracing::{info, warn};

use crate::config::CategorySource;
use crate::fetch::PageSource;

/// A sitemap document is either a list of pages or an index of sitemaps.
#[derive(Debug, PartialEq)]
pub enum Sitemap {
    UrlSet(Vec<String>),
    Index(Vec<String>),
}

/// Fetch the sitemap (following one level of sitemap index) and return the
/// category pages matching `pattern`. Child sitemaps are fetched `delay`
/// apart.
pub async fn discover_categories(
    source: &dyn PageSource,
    sitemap_url: &str,
    pattern: &str,
    delay: Duration,
) -> Result<Vec<CategorySource>> {
    let re = Regex::new(pattern).with_context(|| format!("Invalid category pattern {:?}", pattern))?;

    info!("Fetching sitemap: {}", sitemap_url);
    let root = source
        .fetch(sitemap_url)
        .await
        .with_context(|| format!("Failed to fetch sitemap {}", sitemap_url))?;

    let all_urls = match parse_sitemap(&root.body)? {
        Sitemap::UrlSet(urls) => urls,
        Sitemap::Index(children) => {
            // category sitemaps when the index names them, every child otherwise
            let wanted: Vec<&String> = children.iter().filter(|u| u.contains("category")).collect();
            let wanted = if wanted.is_empty() { children.iter().collect() } else { wanted };

            let mut urls = Vec::new();
            for child in wanted {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match source.fetch(child).await {
                    Ok(page) => match parse_sitemap(&page.body) {
                        Ok(Sitemap::UrlSet(found)) => urls.extend(found),
                        Ok(Sitemap::Index(_)) => warn!("Skipping nested sitemap index {}", child),
                        Err(e) => warn!("Skipping sitemap {}: {}", child, e),
                    },
                    Err(e) => warn!("Skipping sitemap {}: {}", child, e),
                }
            }
            urls
        }
    };
    info!("Total URLs in sitemap: {}", all_urls.len());

    let categories = filter_categories(all_urls, &re);
    info!("Category pages after filtering: {}", categories.len());
    Ok(categories)
}

/// Keep URLs matching `re`, once each, named after the captured slug.
pub fn filter_categories(urls: Vec<String>, re: &Regex) -> Vec<CategorySource> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter_map(|url| {
            let slug = re.captures(&url)?.get(1)?.as_str().to_string();
            seen.insert(url.clone()).then(|| CategorySource {
                name: category_name(&slug),
                url,
            })
        })
        .collect()
}

/// "sushi-fish" → "Restaurants » Sushi Fish"
fn category_name(slug: &str) -> String {
    let words: Vec<String> = slug
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    format!("Restaurants » {}", words.join(" "))
}

/// Parse a `<urlset>` or `<sitemapindex>` and return its `<loc>` URLs.
pub fn parse_sitemap(xml: &str) -> Result<Sitemap> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut is_index = false;
    let mut in_entry = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemapindex" => is_index = true,
                b"url" | b"sitemap" => in_entry = true,
                b"loc" if in_entry => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => {
                let loc = e.unescape()?.trim().to_string();
                if !loc.is_empty() {
                    urls.push(loc);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" | b"sitemap" => in_entry = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(if is_index {
        Sitemap::Index(urls)
    } else {
        Sitemap::UrlSet(urls)
    })
}
