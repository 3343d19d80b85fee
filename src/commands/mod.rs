pub mod backlog;
pub mod pool;

// Re-export command functions for convenience
pub use backlog::{release, seed, status};
pub use pool::{run, work};

use std::sync::Arc;

use anyhow::{Context, Result};

use harvester::config::Config;
use harvester::crawler::{HttpExtractor, HttpSessionFactory};
use harvester::scheduler::Supervisor;
use harvester::storage::{open_backlog, RequiredFields, SharedBacklog};

/// Open the configured backlog judged by the default completeness rule
pub fn open_store(config: &Config) -> Result<SharedBacklog> {
    open_backlog(&config.backlog, Arc::new(RequiredFields::default())).with_context(|| {
        format!(
            "Failed to open backlog at {}",
            config.backlog.sqlite_path.display()
        )
    })
}

/// Supervisor wired to the HTTP extractor and credential sessions
pub fn build_supervisor(config: &Config, store: SharedBacklog) -> Supervisor {
    Supervisor::from_config(
        config,
        store,
        Arc::new(HttpExtractor::new(config.session.max_retries)),
        Arc::new(HttpSessionFactory::new(config.session.clone())),
    )
}
