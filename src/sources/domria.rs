use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use super::{
    fetch_page, host_matches, parse_off_thread, resolve_url, select_attr, select_text, selector,
};
use crate::listing::{Listing, SourceTag};

const BASE: &str = "https://dom.ria.com";

static CARD: Lazy<Selector> = Lazy::new(|| selector(".ticket-item"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector(".ticket-title"));
static PRICE: Lazy<Selector> = Lazy::new(|| selector(".price"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static IMAGE: Lazy<Selector> = Lazy::new(|| selector("img[src]"));

/// dom.ria.com list view (first page only).
pub struct DomRiaSource {
    client: reqwest::Client,
}

impl DomRiaSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

pub fn parse_page(html: &str) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    doc.select(&CARD)
        .filter_map(|card| {
            let link = select_attr(card, &LINK, "href").and_then(|h| resolve_url(BASE, h))?;
            let mut l = Listing::new(
                SourceTag::DomRia,
                link,
                select_text(card, &TITLE).unwrap_or_else(|| "No title".to_string()),
            );
            l.price = select_text(card, &PRICE);
            l.image_url = select_attr(card, &IMAGE, "src").and_then(|s| resolve_url(BASE, s));
            Some(l)
        })
        .collect()
}

#[async_trait]
impl super::ListingSource for DomRiaSource {
    fn tag(&self) -> SourceTag {
        SourceTag::DomRia
    }

    fn handles(&self, url: &Url) -> bool {
        host_matches(url, "dom.ria.com")
    }

    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>> {
        let Some(html) = fetch_page(&self.client, query_url, "utf-8").await? else {
            anyhow::bail!("dom.ria.com returned no results page for {query_url}");
        };
        parse_off_thread(html, parse_page).await
    }
}
