//! harvester - Lease-based backlog coordination for collection workers
//!
//! Many independent workers pull unfinished items from a shared backlog,
//! run an external extraction step on each, persist the result and release
//! the item, while pacing requests toward the source and tolerating crashes
//! without losing or duplicating work.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Work items, leases and detail payloads
//! - [`storage`] - Backlog stores (SQLite, in-memory) and the completeness predicate
//! - [`crawler`] - Rate limiter, sessions, extractor and the worker loop
//! - [`scheduler`] - Worker pool supervisor and expired lease reaper
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harvester::config::Config;
//! use harvester::crawler::{HttpExtractor, HttpSessionFactory};
//! use harvester::scheduler::Supervisor;
//! use harvester::storage::{open_backlog, RequiredFields};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = open_backlog(&config.backlog, Arc::new(RequiredFields::default()))?;
//!     let supervisor = Supervisor::from_config(
//!         &config,
//!         store,
//!         Arc::new(HttpExtractor::new(config.session.max_retries)),
//!         Arc::new(HttpSessionFactory::new(config.session.clone())),
//!     );
//!     let report = supervisor.run().await?;
//!     println!("completed {}", report.completed());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{
        Extractor, HttpExtractor, HttpSessionFactory, ItemOutcome, RateLimiter, Session,
        SessionFactory, WorkerLoop, WorkerReport, WorkerSettings,
    };
    pub use crate::error::{Error, ErrorCategory, HarvesterErrorTrait, Result};
    pub use crate::models::{ClaimedItem, ItemDetail, ItemId, WorkItem, WorkerId};
    pub use crate::scheduler::{Supervisor, SupervisorReport, WorkerOutcome};
    pub use crate::storage::{
        BacklogRepository, CompletenessPredicate, RequiredFields, SharedBacklog,
    };
}

// Direct re-exports for convenience
pub use models::{BacklogStats, ItemId, WorkItem, WorkerId};
