// src/sources/imot.rs
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::{
    fetch_page, host_matches, parse_off_thread, resolve_url, select_attr, select_text, selector,
};
use crate::listing::{Listing, SourceTag};

const BASE: &str = "https://www.imot.bg/";
// The site serves cp1251 and does not always say so.
const CHARSET: &str = "windows-1251";

static CARD: Lazy<Selector> = Lazy::new(|| selector("div.ads2023 > div.item"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("a.title"));
static PRICE: Lazy<Selector> = Lazy::new(|| selector("div.price div"));
static IMAGE: Lazy<Selector> = Lazy::new(|| selector("div.big a img.pic"));
static INFO: Lazy<Selector> = Lazy::new(|| selector("div.info"));
static SELLER: Lazy<Selector> = Lazy::new(|| selector("div.sInfo div.name a"));

static PAGE_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/p-\d+").unwrap());
static LISTING_ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/obiavi/(naemi|prodazhbi)/").unwrap());

/// imot.bg search results, following `/p-N/` pagination.
pub struct ImotSource {
    client: reqwest::Client,
    max_pages: usize,
}

impl ImotSource {
    pub fn new(client: reqwest::Client, max_pages: usize) -> Self {
        Self {
            client,
            max_pages: max_pages.max(1),
        }
    }
}

/// URL of result page `page` (1-based). `None` when the URL has no known
/// pagination scheme and only page 1 exists.
pub fn page_url(url: &str, page: usize) -> Option<String> {
    if page <= 1 {
        return Some(url.to_string());
    }
    if PAGE_SEGMENT.is_match(url) {
        return Some(PAGE_SEGMENT.replace(url, format!("/p-{page}")).into_owned());
    }
    let m = LISTING_ROOT.find(url)?;
    Some(format!("{}p-{page}/{}", &url[..m.end()], &url[m.end()..]))
}

pub fn parse_page(html: &str) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();
    for card in doc.select(&CARD) {
        let Some(link) = select_attr(card, &TITLE, "href").and_then(|h| resolve_url(BASE, h))
        else {
            continue;
        };
        let title = select_text(card, &TITLE).unwrap_or_else(|| "No title".to_string());

        let mut listing = Listing::new(SourceTag::Imot, link, title)
            .with_detail("info", select_text(card, &INFO).unwrap_or_default())
            .with_detail("seller", select_text(card, &SELLER).unwrap_or_default());
        listing.price = select_text(card, &PRICE);
        listing.image_url = select_attr(card, &IMAGE, "src").and_then(|s| resolve_url(BASE, s));
        out.push(listing);
    }
    out
}

#[async_trait]
impl super::ListingSource for ImotSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Imot
    }

    fn handles(&self, url: &Url) -> bool {
        host_matches(url, "imot.bg")
    }

    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>> {
        let mut all: Vec<Listing> = Vec::new();
        let mut ids: HashSet<String> = HashSet::new();

        for page in 1..=self.max_pages {
            let Some(url) = page_url(query_url, page) else {
                break;
            };
            let Some(html) = fetch_page(&self.client, &url, CHARSET).await? else {
                if page == 1 {
                    anyhow::bail!("imot.bg returned no results page for {query_url}");
                }
                // Past the last page.
                break;
            };
            let cards = parse_off_thread(html, parse_page).await?;
            if cards.is_empty() {
                break;
            }
            // Past the last page the site may serve the last one again.
            let before = ids.len();
            for c in cards {
                if ids.insert(c.id.clone()) {
                    all.push(c);
                }
            }
            if ids.len() == before {
                break;
            }
        }

        tracing::debug!(source = "imot.bg", url = query_url, found = all.len(), "fetched");
        Ok(all)
    }
}
