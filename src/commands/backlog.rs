use std::path::Path;

use anyhow::{Context, Result};

use harvester::config::Config;
use harvester::utils::error::StoreError;

use super::open_store;

/// Enqueue one locator per line; blank lines and `#` comments are ignored
pub async fn seed(config: Config, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let store = open_store(&config)?;
    let before = store.stats().await?.total;

    let mut rejected = 0usize;
    for line in content.lines() {
        let locator = line.trim();
        if locator.is_empty() || locator.starts_with('#') {
            continue;
        }

        match store.enqueue(locator).await {
            Ok(_) => {}
            Err(StoreError::InvalidLocator { locator, reason }) => {
                tracing::warn!(locator = %locator, reason = %reason, "Skipping invalid locator");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let after = store.stats().await?.total;
    println!(
        "Seeded {} new item(s), {} rejected, {} total",
        after.saturating_sub(before),
        rejected,
        after
    );
    Ok(())
}

/// Clear every lease regardless of owner
pub async fn release(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let released = store.release_all().await?;
    harvester::metrics::record_released("all", released);
    println!("Released {released} lease(s)");
    Ok(())
}

/// Print backlog counters
pub async fn status(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let stats = store.stats().await?;

    println!("Backlog Status");
    println!("==============");
    println!("Total:     {}", stats.total);
    println!("Pending:   {}", stats.pending);
    println!("Complete:  {}", stats.complete);
    println!("Poisoned:  {}", stats.poisoned);
    println!("Leased:    {}", stats.leased);
    println!("Completion: {:.1}%", stats.completion_rate() * 100.0);
    Ok(())
}
