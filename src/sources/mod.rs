// src/sources/mod.rs
pub mod address;
pub mod domria;
pub mod imot;

use anyhow::{Context, Result};
use metrics::histogram;
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Selector};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::listing::{Listing, SourceTag};

pub use address::AddressSource;
pub use domria::DomRiaSource;
pub use imot::ImotSource;

/// A site that can turn a search URL into its current listings.
#[async_trait::async_trait]
pub trait ListingSource: Send + Sync {
    fn tag(&self) -> SourceTag;

    /// Whether `url` is a search page of this site.
    fn handles(&self, url: &Url) -> bool;

    /// Best-effort snapshot of the listings behind `query_url`.
    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>>;
}

/// Ordered set of sources; picks the one responsible for a URL.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn ListingSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn ListingSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// All built-in sites sharing one HTTP client.
    pub fn with_defaults(timeout: Duration, max_pages: usize) -> Result<Self> {
        let client = http_client(timeout)?;
        Ok(Self::new()
            .with_source(Arc::new(ImotSource::new(client.clone(), max_pages)))
            .with_source(Arc::new(AddressSource::new(client.clone(), max_pages)))
            .with_source(Arc::new(DomRiaSource::new(client))))
    }

    /// The source for `url`, or `None` for unknown sites and non-http(s) input.
    pub fn resolve(&self, url: &str) -> Option<Arc<dyn ListingSource>> {
        let parsed = Url::parse(url.trim()).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        self.sources.iter().find(|s| s.handles(&parsed)).cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// `true` when the host is `domain` or one of its subdomains.
pub fn host_matches(url: &Url, domain: &str) -> bool {
    match url.host_str() {
        Some(host) => {
            let host = host.to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        }
        None => false,
    }
}

/// Shared HTTP client with a browser-like identity.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    let user_agent = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );

    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .context("building HTTP client")
}

/// GET a page. `Ok(None)` on a non-success status (used as "no more pages").
pub async fn fetch_page(
    client: &reqwest::Client,
    url: &str,
    default_charset: &str,
) -> Result<Option<String>> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        tracing::debug!(url, %status, "page not available");
        return Ok(None);
    }
    let body = resp
        .text_with_charset(default_charset)
        .await
        .with_context(|| format!("reading body of {url}"))?;
    Ok(Some(body))
}

/// Runs an HTML parser on the blocking pool so parsing never stalls the runtime.
pub async fn parse_off_thread<T, F>(html: String, parse: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&str) -> T + Send + 'static,
{
    let t0 = std::time::Instant::now();
    let out = tokio::task::spawn_blocking(move || parse(&html))
        .await
        .context("parser task failed")?;
    histogram!("source_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

/// Resolves `href` (absolute, protocol-relative or rooted) against `base`.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(String::from)
}

/// Collapse whitespace and trim.
pub fn normalize_text(s: &str) -> String {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s, " ").trim().to_string()
}

pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e}"))
}

/// Normalized text of the first match, `None` when missing or blank.
pub(crate) fn select_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(|m| normalize_text(&m.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

pub(crate) fn select_attr<'a>(el: ElementRef<'a>, sel: &Selector, attr: &str) -> Option<&'a str> {
    el.select(sel).next().and_then(|m| m.value().attr(attr))
}
