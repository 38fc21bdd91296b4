// src/sources/address.rs
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::{
    fetch_page, host_matches, parse_off_thread, resolve_url, select_attr, select_text, selector,
};
use crate::listing::{Listing, SourceTag};

const BASE: &str = "https://address.bg";

static CARD: Lazy<Selector> = Lazy::new(|| selector("div.offer-card"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("h3.offer-title"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static PRICE_SPAN: Lazy<Selector> = Lazy::new(|| selector("div.left small.price span"));
static PRICE: Lazy<Selector> = Lazy::new(|| selector("div.left small.price"));
static IMAGE: Lazy<Selector> = Lazy::new(|| selector("div.img picture img"));
static SIZE: Lazy<Selector> = Lazy::new(|| selector("div.right small.gray-d"));
static KIND: Lazy<Selector> = Lazy::new(|| selector("div.right small.gray-m"));
static PAGINATION: Lazy<Selector> = Lazy::new(|| selector("li.pagination-page-nav"));

/// address.bg search results. Works on the server-rendered markup only; cards
/// the site lazy-loads with scripts are not seen.
pub struct AddressSource {
    client: reqwest::Client,
    max_pages: usize,
}

impl AddressSource {
    pub fn new(client: reqwest::Client, max_pages: usize) -> Self {
        Self {
            client,
            max_pages: max_pages.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct AddressPage {
    pub listings: Vec<Listing>,
    /// Page count advertised by the pagination bar (at least 1).
    pub pages: usize,
}

pub fn page_url(url: &str, page: usize) -> String {
    if page <= 1 {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}page={page}")
}

fn image_of(card: ElementRef<'_>) -> Option<String> {
    let img = card.select(&IMAGE).next()?;
    let v = img.value();
    let raw = v
        .attr("src")
        .filter(|s| !s.trim().is_empty())
        .or_else(|| v.attr("data-src").filter(|s| !s.trim().is_empty()))
        .or_else(|| v.attr("srcset").and_then(|s| s.split_whitespace().next()))?;
    resolve_url(BASE, raw)
}

pub fn parse_page(html: &str) -> AddressPage {
    let doc = Html::parse_document(html);
    let mut listings = Vec::new();

    for card in doc.select(&CARD) {
        let Some(link) = select_attr(card, &LINK, "href").map(str::trim) else {
            continue;
        };
        if !link.starts_with("http") {
            continue;
        }

        let price = select_text(card, &PRICE_SPAN)
            .or_else(|| select_text(card, &PRICE))
            .map(|p| format!("{p} €"));

        let mut listing = Listing::new(
            SourceTag::Address,
            link,
            select_text(card, &TITLE).unwrap_or_else(|| "No title".to_string()),
        )
        .with_detail("size", select_text(card, &SIZE).unwrap_or_default())
        .with_detail("type", select_text(card, &KIND).unwrap_or_default());
        listing.price = price;
        listing.image_url = image_of(card);
        listings.push(listing);
    }

    let pages = doc.select(&PAGINATION).count().max(1);
    AddressPage { listings, pages }
}

#[async_trait]
impl super::ListingSource for AddressSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Address
    }

    fn handles(&self, url: &Url) -> bool {
        host_matches(url, "address.bg")
    }

    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>> {
        let Some(html) = fetch_page(&self.client, query_url, "utf-8").await? else {
            anyhow::bail!("address.bg returned no results page for {query_url}");
        };
        let first = parse_off_thread(html, parse_page).await?;
        let last = first.pages.min(self.max_pages);
        let mut all = first.listings;

        for page in 2..=last {
            let url = page_url(query_url, page);
            match fetch_page(&self.client, &url, "utf-8").await? {
                Some(html) => all.extend(parse_off_thread(html, parse_page).await?.listings),
                None => {
                    tracing::debug!(url, "skipping unavailable page");
                }
            }
        }

        let mut ids = HashSet::new();
        all.retain(|l| ids.insert(l.id.clone()));
        tracing::debug!(source = "address.bg", url = query_url, found = all.len(), "fetched");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="offer-card">
            <a href="https://address.bg/offer/1"><div class="img"><picture><img data-src="/images/1.jpg"></picture></div></a>
            <h3 class="offer-title">Двустаен, Лозенец</h3>
            <div class="left"><small class="price"><span>850</span></small></div>
            <div class="right"><small class="gray-d">75 m2</small><small class="gray-m">Apartment</small></div>
          </div>
          <div class="offer-card">
            <a href="https://address.bg/offer/2"><div class="img"><picture><img srcset="https://cdn.address.bg/2.jpg 1x, https://cdn.address.bg/2@2x.jpg 2x"></picture></div></a>
            <h3 class="offer-title">Studio</h3>
            <div class="left"><small class="price">1 200</small></div>
          </div>
          <div class="offer-card">
            <a href="/offer/3"></a><h3 class="offer-title">relative link</h3>
          </div>
          <div class="offer-card"><h3 class="offer-title">no price</h3><a href="https://address.bg/offer/4"></a></div>
          <ul><li class="pagination-page-nav">1</li><li class="pagination-page-nav">2</li></ul>
        </body></html>
    "#;

    #[test]
    fn parses_cards_prices_and_images() {
        let page = parse_page(PAGE);
        assert_eq!(page.pages, 2);
        let ids: Vec<&str> = page.listings.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["https://address.bg/offer/1", "https://address.bg/offer/2", "https://address.bg/offer/4"]
        );

        let a = &page.listings[0];
        assert_eq!(a.price.as_deref(), Some("850 €"));
        assert_eq!(a.image_url.as_deref(), Some("https://address.bg/images/1.jpg"));
        assert_eq!(a.detail("size"), Some("75 m2"));
        assert_eq!(a.detail("type"), Some("Apartment"));

        let b = &page.listings[1];
        assert_eq!(b.price.as_deref(), Some("1 200 €"));
        assert_eq!(b.image_url.as_deref(), Some("https://cdn.address.bg/2.jpg"));

        assert_eq!(page.listings[2].price, None);
    }

    #[test]
    fn page_url_appends_query_param() {
        assert_eq!(page_url("https://address.bg/rent?city=1", 2), "https://address.bg/rent?city=1&page=2");
        assert_eq!(page_url("https://address.bg/rent", 3), "https://address.bg/rent?page=3");
        assert_eq!(page_url("https://address.bg/rent", 1), "https://address.bg/rent");
    }
}
