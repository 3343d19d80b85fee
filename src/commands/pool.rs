use anyhow::{bail, Context, Result};

use harvester::config::Config;
use harvester::models::{ItemId, WorkerId};

use super::{build_supervisor, open_store};

/// Run a supervised pool of workers until the backlog is drained
pub async fn run(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let supervisor = build_supervisor(&config, store);

    println!("Starting worker pool");
    println!("====================");
    println!("Workers: {}", config.worker.count);
    println!("Batch size: {}", config.worker.batch_size);
    println!(
        "Delay window: {}-{}ms",
        config.worker.min_delay_ms, config.worker.max_delay_ms
    );

    let report = supervisor
        .run()
        .await
        .context("Failed to start worker pool")?;

    println!();
    println!("Epoch: {}", report.epoch);
    println!("Released at start: {}", report.released_at_start);
    for outcome in &report.outcomes {
        println!("  {outcome}");
    }
    println!("Processed: {} (completed {})", report.processed(), report.completed());

    if !report.is_success() {
        let failed: Vec<String> = report.failed().iter().map(|id| id.to_string()).collect();
        bail!("{} worker(s) failed: {}", failed.len(), failed.join(", "));
    }

    Ok(())
}

/// Run a single worker, or process a single item when `target` is numeric
pub async fn work(config: Config, target: Option<String>) -> Result<()> {
    let store = open_store(&config)?;
    let supervisor = build_supervisor(&config, store);

    match target.as_deref().map(str::trim) {
        Some(raw) if raw.parse::<i64>().is_ok() => {
            let item = ItemId(raw.parse::<i64>()?);
            let worker = config.worker_id()?;
            tracing::info!(worker = %worker, item = %item, "Processing single item");

            match supervisor.run_single(worker, item).await? {
                Some(outcome) => println!("Item {item}: {}", outcome.as_str()),
                None => println!("Item {item} does not exist or is leased by another worker"),
            }
        }
        other => {
            let worker = match other {
                Some(raw) => WorkerId::new(raw).context("Worker id cannot be empty")?,
                None => config.worker_id()?,
            };
            tracing::info!(worker = %worker, "Running single worker");

            let report = supervisor.run_worker(worker).await?;
            println!(
                "{}: {} batches, {} completed, {} incomplete, {} failed, {} poisoned",
                report.worker,
                report.batches,
                report.completed,
                report.incomplete,
                report.failed,
                report.poisoned
            );
        }
    }

    Ok(())
}
