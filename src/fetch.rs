use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use thiserror::Error;
use tracing::debug;

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Html,
    Markdown,
    Json,
}

impl PageFormat {
    /// Pick a format from the response content type, falling back to the URL.
    pub fn detect(content_type: Option<&str>, url: &str) -> Self {
        let ct = content_type.unwrap_or("").to_lowercase();
        if ct.contains("json") {
            PageFormat::Json
        } else if ct.contains("markdown") || ct.starts_with("text/plain") {
            PageFormat::Markdown
        } else if ct.is_empty() && url.split('?').next().is_some_and(|p| p.ends_with(".json")) {
            PageFormat::Json
        } else {
            PageFormat::Html
        }
    }
}

/// One fetched upstream page.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub body: String,
    pub format: PageFormat,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("spider.cloud: {0}")]
    Spider(String),
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError>;
}

// ── Direct HTTP ──

pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(HttpSource { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let format = PageFormat::detect(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            url,
        );
        let body = response.text().await?;
        debug!(url, bytes = body.len(), ms = start.elapsed().as_millis() as u64, "Fetched");

        Ok(Page {
            url: url.to_string(),
            body,
            format,
        })
    }
}

// ── spider.cloud ──

/// Fetches pages rendered to markdown by spider.cloud.
pub struct SpiderSource {
    spider: Spider,
}

impl SpiderSource {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SPIDER_API_KEY")
            .map_err(|_| anyhow!("SPIDER_API_KEY environment variable must be set"))?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(SpiderSource { spider })
    }
}

#[async_trait]
impl PageSource for SpiderSource {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Markdown)),
            ..Default::default()
        };

        let start = Instant::now();
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| FetchError::Spider(e.to_string()))?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_u64()) {
            if !(200..300).contains(&status) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: status as u16,
                });
            }
        }

        let body = first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(strip_images)
            .ok_or_else(|| FetchError::Spider(format!("no content for {}", url)))?;
        debug!(url, bytes = body.len(), ms = start.elapsed().as_millis() as u64, "Fetched via spider");

        Ok(Page {
            url: url.to_string(),
            body,
            format: PageFormat::Markdown,
        })
    }
}

/// Remove markdown image syntax: ![alt](url)
fn strip_images(md: &str) -> String {
    let cleaned = IMAGE_RE.replace_all(md, "");
    BLANK_RUN_RE.replace_all(&cleaned, "\n\n").to_string()
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Serves pages from `tests/fixtures`; any other URL fails with a 404.
    #[derive(Default)]
    pub struct FixtureSource {
        pages: HashMap<String, (String, PageFormat)>,
        requested: Mutex<Vec<String>>,
    }

    impl FixtureSource {
        pub fn with(mut self, url: &str, fixture: &str, format: PageFormat) -> Self {
            self.pages.insert(url.to_string(), (fixture.to_string(), format));
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for FixtureSource {
        async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            let (fixture, format) = self.pages.get(url).ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })?;
            let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), fixture);
            let body = std::fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("{}: {}", path, e));
            Ok(Page {
                url: url.to_string(),
                body,
                format: *format,
            })
        }
    }
}
