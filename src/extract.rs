//! Page fetching and text extraction for template enrichment.
//!
//! Fetches a template's source page over HTTP and reduces it to plain
//! searchable text: script/style noise stripped, whitespace collapsed to
//! single-space-joined tokens, aside content and a publication date pulled
//! out separately when the page exposes them.

use std::{thread::sleep, time::Duration};

use reqwest::StatusCode;

use crate::config::ScrapeConfig;

const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

/// Fetch failures, split by whether a retry could plausibly help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("terminal: {0}")]
    Terminal(String),
}

/// Plain-text content extracted from a fetched page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub main_text: String,
    pub aside_text: Option<String>,
    /// ISO-8601 publication timestamp, when the page declares one.
    pub published_at: Option<String>,
}

fn validate_url_policy(url: &reqwest::Url, config: &ScrapeConfig) -> Result<(), FetchError> {
    if !config.allowed_schemes.iter().any(|s| s == url.scheme()) {
        return Err(FetchError::Terminal(format!(
            "URL scheme '{}' not allowed",
            url.scheme()
        )));
    }
    Ok(())
}

/// Fetch a page body with bounded retries. 429 and 5xx responses back off
/// and retry; 4xx responses fail immediately.
pub fn fetch_page(url: &str, config: &ScrapeConfig) -> Result<String, FetchError> {
    let mut url = url.to_string();
    if url.starts_with("//") {
        url = format!("https:{url}");
    }

    let url_parsed = reqwest::Url::parse(&url)
        .map_err(|e| FetchError::Terminal(format!("invalid URL: {e}")))?;
    validate_url_policy(&url_parsed, config)?;

    let host = url_parsed.host_str().unwrap_or_default();
    let path = url_parsed.path();
    let iden = format!("{host}{path}");

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT_DEFAULT)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| FetchError::Terminal(format!("client build failed: {e}")))?;

    let mut last_err = String::new();

    for attempt in 0..config.max_retries {
        if attempt > 0 {
            log::debug!("{iden}: retrying");
        }

        let resp = match client.get(&url).send() {
            Ok(r) => r,
            Err(err) => {
                last_err = err.to_string();
                continue;
            }
        };

        let status = resp.status();

        if status.is_success() {
            return resp
                .text()
                .map_err(|e| FetchError::Retryable(format!("body read failed: {e}")));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            sleep(Duration::from_secs((attempt + 1) * 4));
            last_err = status.to_string();
            continue;
        }

        if status.is_client_error() {
            // no need to try again, it's over...
            return Err(FetchError::Terminal(format!("{iden}: {status}")));
        }

        last_err = status.to_string();
    }

    Err(FetchError::Retryable(format!("{iden}: {last_err}")))
}

/// Fetch and extract in one step.
pub fn fetch_and_extract(url: &str, config: &ScrapeConfig) -> Result<ExtractedPage, FetchError> {
    let html = fetch_page(url, config)?;
    Ok(extract_page(&html))
}

/// The extraction collaborator as seen by the enrichment service.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, url: &str) -> Result<ExtractedPage, FetchError>;
}

/// Live HTTP-backed extractor.
pub struct HttpExtractor {
    config: ScrapeConfig,
}

impl HttpExtractor {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }
}

impl ContentExtractor for HttpExtractor {
    fn extract(&self, url: &str) -> Result<ExtractedPage, FetchError> {
        fetch_and_extract(url, &self.config)
    }
}

const SKIP_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "aside"];

fn collect_text(element: scraper::ElementRef, out: &mut Vec<String>) {
    if SKIP_ELEMENTS.contains(&element.value().name()) {
        return;
    }

    for child in element.children() {
        if let Some(el) = scraper::ElementRef::wrap(child) {
            collect_text(el, out);
        } else if let Some(text) = child.value().as_text() {
            out.extend(text.split_whitespace().map(str::to_string));
        }
    }
}

/// Reduce an HTML document to plain text fields.
pub fn extract_page(html: &str) -> ExtractedPage {
    let document = scraper::Html::parse_document(html);

    let mut tokens = vec![];
    collect_text(document.root_element(), &mut tokens);
    let main_text = tokens.join(" ");

    let aside_selector = scraper::Selector::parse("aside").unwrap();
    let mut aside_tokens = vec![];
    for aside in document.select(&aside_selector) {
        for text in aside.text() {
            aside_tokens.extend(text.split_whitespace().map(str::to_string));
        }
    }
    let aside_text = if aside_tokens.is_empty() {
        None
    } else {
        Some(aside_tokens.join(" "))
    };

    ExtractedPage {
        main_text,
        aside_text,
        published_at: extract_published_at(&document),
    }
}

fn extract_published_at(document: &scraper::Html) -> Option<String> {
    let meta_selector = scraper::Selector::parse("meta").unwrap();

    for element in document.select(&meta_selector) {
        let meta_prop = element.attr("property").unwrap_or_default();
        let meta_key = element.attr("name").or(Some(meta_prop)).unwrap_or_default();

        if ["article:published_time", "date", "datePublished"]
            .into_iter()
            .any(|name| name == meta_key)
        {
            let value = element.attr("content").unwrap_or_default().trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    // fall back to JSON-LD structured data
    let script_selector = scraper::Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    for element in document.select(&script_selector) {
        let json_text = element.text().collect::<String>();
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&json_text) {
            let mut published = None;
            extract_date_from_json_ld(&json, &mut published);
            if published.is_some() {
                return published;
            }
        }
    }

    None
}

fn extract_date_from_json_ld(json: &serde_json::Value, published: &mut Option<String>) {
    if published.is_some() {
        return;
    }

    // Handle @graph arrays
    if let Some(graph) = json.get("@graph").and_then(|g| g.as_array()) {
        for item in graph {
            extract_date_from_json_ld(item, published);
        }
        return;
    }
    // Handle top-level arrays
    if let Some(arr) = json.as_array() {
        for item in arr {
            extract_date_from_json_ld(item, published);
        }
        return;
    }

    if let Some(date) = json
        .get("datePublished")
        .or_else(|| json.get("dateCreated"))
        .and_then(|v| v.as_str())
    {
        let trimmed = date.trim();
        if !trimmed.is_empty() {
            *published = Some(trimmed.to_string());
        }
    }
}
