use anyhow::Context;
use housing_acquire::{AppConfig, Pipeline};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🏠 Housing Acquire");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    let pipeline = Pipeline::from_config(&config).context("Failed to build pipeline")?;

    let query = config.query.to_query();
    let result = pipeline.acquire(&query).await;

    info!("✅ Acquired {} listings", result.records.len());

    for (i, record) in result.records.iter().enumerate() {
        let price = record
            .price
            .map(|p| format!("{} ₪", p))
            .unwrap_or_else(|| "price n/a".to_string());
        let rooms = record
            .rooms
            .map(|r| format!("{} rooms", r))
            .unwrap_or_else(|| "rooms n/a".to_string());

        println!("{}. {} ({})", i + 1, record.title, price);
        println!("   {}, {}", rooms, record.location.text);
        println!("   ID: {} [{:?}]", record.id, record.source);
        println!("   URL: {}", record.url);
        println!();
    }

    if !result.diagnostics.issues.is_empty() {
        info!("Issues: {:?}", result.diagnostics.issues);
    }

    let json = serde_json::to_string_pretty(&result.records)?;
    tokio::fs::write("acquired_listings.json", json)
        .await
        .context("Failed to write acquired_listings.json")?;
    info!("💾 Saved all listings to acquired_listings.json");

    let diagnostics = serde_json::to_string_pretty(&result.diagnostics)?;
    tokio::fs::write("acquisition_diagnostics.json", diagnostics)
        .await
        .context("Failed to write acquisition_diagnostics.json")?;

    tokio::fs::create_dir_all("raw_scrape").await?;

    for (i, record) in result.records.iter().enumerate() {
        let filename = format!("raw_scrape/{}.json", file_stem(&record.id, i));
        let record_json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&filename, record_json)
            .await
            .with_context(|| format!("Failed to write {}", filename))?;
    }

    info!("💾 Saved {} individual listing files to raw_scrape/", result.records.len());

    Ok(())
}

/// Listing ids come from remote pages; keep them filesystem-safe
fn file_stem(id: &str, index: usize) -> String {
    let stem: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        format!("listing-{}", index)
    } else {
        stem
    }
}
