// src/listing.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat identity of a notification recipient (Telegram chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which site produced a listing. Selects the notification template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    Imot,
    Address,
    DomRia,
}

impl SourceTag {
    pub const ALL: [SourceTag; 3] = [SourceTag::Imot, SourceTag::Address, SourceTag::DomRia];

    pub fn name(&self) -> &'static str {
        match self {
            SourceTag::Imot => "imot.bg",
            SourceTag::Address => "address.bg",
            SourceTag::DomRia => "dom.ria.com",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One scraped advertisement. Built fresh every cycle; only `id` outlives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Dedup key: explicit id when the site has one, otherwise the absolute URL.
    pub id: String,
    pub title: String,
    /// `None` means the card carried no price.
    pub price: Option<String>,
    /// Absolute URL (sources resolve relative paths).
    pub image_url: Option<String>,
    /// Site-specific attributes in display order (seller, size, type, ...).
    pub details: Vec<(String, String)>,
    pub source: SourceTag,
}

impl Listing {
    pub fn new(source: SourceTag, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            price: None,
            image_url: None,
            details: Vec::new(),
            source,
        }
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.push((key.to_string(), value.into()));
        self
    }

    /// The listing link. Every source uses the absolute URL as the id.
    pub fn link(&self) -> &str {
        &self.id
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
