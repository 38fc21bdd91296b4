//! Fetches one search URL through the matching source and prints what a
//! subscriber would be sent. Nothing is stored and no chat message goes out.

use std::time::Duration;

use listing_watch_bot::notify::render;
use listing_watch_bot::sources::SourceRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let Some(url) = std::env::args().nth(1) else {
        anyhow::bail!("usage: scrape_demo <search-url>");
    };

    let sources = SourceRegistry::with_defaults(Duration::from_secs(30), 2)?;
    let Some(source) = sources.resolve(&url) else {
        anyhow::bail!("no source handles {url}");
    };

    let listings = source.fetch(&url).await?;
    for l in &listings {
        println!("{}\n", render::listing_caption(l));
    }

    println!("{} listings from {}", listings.len(), source.tag());
    Ok(())
}
