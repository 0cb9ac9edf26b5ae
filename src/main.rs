use anyhow::Context;
use estate_scout::{ListingFilter, RunStatus, Scraper, ScraperConfig};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🏠 Estate Scout");
    info!("==========================================");

    let config = ScraperConfig::from_env()?;

    // Usage: estate-scout [filter.json] [page budget]
    let args: Vec<String> = env::args().collect();
    let filter = match args.get(1) {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read filter file {}", path))?;
            serde_json::from_str::<ListingFilter>(&raw)
                .with_context(|| format!("Invalid filter in {}", path))?
        }
        None => ListingFilter::for_city("almaty"),
    };
    let page_budget = match args.get(2) {
        Some(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("Invalid page budget '{}'", raw))?,
        None => 1,
    };

    let scraper = Scraper::new(config)?;
    info!(
        "Searching {} in {} via {}...",
        filter.property_type.as_str(),
        filter.city,
        scraper.config().site.name()
    );

    let run = scraper.scrape(&filter, page_budget, Some("cli")).await?;

    if run.status == RunStatus::Failed {
        warn!("❌ Scrape failed: {}", run.error.as_deref().unwrap_or("unknown cause"));
    } else {
        info!(
            "\n✅ Scraped {} properties ({} total found, status: {})\n",
            run.count(),
            run.total_estimate,
            run.status.as_str()
        );
    }

    for (i, listing) in run.records.iter().enumerate() {
        println!("{}. {} ({} {})", i + 1, listing.title, listing.price, listing.currency);
        if !listing.address.is_empty() {
            println!("   {}", listing.address);
        }
        let rooms = listing.rooms.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string());
        let area = listing.area.map(|a| format!("{:.1}", a)).unwrap_or_else(|| "?".to_string());
        println!("   {} комн., {} м²", rooms, area);
        println!("   ID: {}", listing.id);
        println!("   Images: {}", listing.images.len());
        println!("   URL: {}", listing.url);
        println!();
    }

    for failure in &run.pages_failed {
        warn!("Page {} failed: {}", failure.page, failure.cause);
    }

    let json = serde_json::to_string_pretty(&run)?;
    tokio::fs::write("scraped_listings.json", json).await?;
    info!("💾 Saved run to scraped_listings.json");

    scraper.flush_notifications().await;

    Ok(())
}
