mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester::config::{Config, ConfigError, MAX_WORKERS, MIN_WORKERS};

#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Lease-based backlog workers with per-worker politeness throttling",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Raise verbosity and dump metrics to stderr on exit
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log format (text, json)
    #[arg(long, global = true, value_parser = ["text", "json"])]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a supervised pool of workers until the backlog is drained
    Run {
        /// Number of workers
        #[arg(
            short,
            long,
            value_parser = clap::value_parser!(u16).range(MIN_WORKERS as i64..=MAX_WORKERS as i64)
        )]
        workers: Option<u16>,
    },

    /// Run one worker; a numeric TARGET processes that single item instead
    Work {
        /// Item id or worker id
        target: Option<String>,
    },

    /// Enqueue locators from a file, one per line
    Seed {
        /// File with one locator per line
        file: PathBuf,
    },

    /// Clear every lease in the backlog
    Release,

    /// Show backlog counters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            if let Some(usage) = usage_error(&e) {
                usage.exit();
            }
            return Err(e).context("Failed to load configuration");
        }
    };
    if let Commands::Run {
        workers: Some(workers),
    } = &cli.command
    {
        config.worker.count = usize::from(*workers);
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    if let Err(e) = config.validate() {
        if let Some(usage) = usage_error(&e) {
            usage.exit();
        }
        return Err(e).context("Invalid configuration");
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.format, &config.logging.level, cli.debug)?;

    if let Err(e) = harvester::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    tracing::info!("harvester starting");
    tracing::debug!("{}", config.display());

    let result = match cli.command {
        Commands::Run { .. } => commands::run(config).await,
        Commands::Work { target } => commands::work(config, target).await,
        Commands::Seed { file } => commands::seed(config, &file).await,
        Commands::Release => commands::release(config).await,
        Commands::Status => commands::status(config).await,
    };

    if cli.debug {
        dump_metrics();
    }

    result?;
    tracing::info!("harvester completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, debug: bool) -> Result<()> {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("harvester=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("harvester={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}

/// Worker counts from the environment or a config file fail like `--workers` does
fn usage_error(err: &ConfigError) -> Option<clap::Error> {
    match err {
        ConfigError::InvalidValue(field, reason)
            if field == "worker.count" || field == "HARVESTER_WORKERS" =>
        {
            Some(Cli::command().error(
                ErrorKind::ValueValidation,
                format!("invalid worker count ({field}): {reason}"),
            ))
        }
        _ => None,
    }
}

/// Side-channel diagnostics for `--debug`
fn dump_metrics() {
    match harvester::metrics::gather_metrics() {
        Ok(text) => eprintln!("{text}"),
        Err(e) => eprintln!("Failed to gather metrics: {e}"),
    }
}
