//! Backlog persistence
//!
//! This module holds the backlog store contract, its SQLite and in-memory
//! implementations, and the completeness predicate the stores evaluate on
//! every detail write.

pub mod completeness;
pub mod memory;
pub mod repository;
pub mod sqlite;

use std::sync::Arc;

use crate::config::BacklogConfig;
use crate::utils::error::StoreError;

pub use completeness::{CompletenessPredicate, RequiredFields};
pub use memory::MemoryBacklogRepository;
pub use repository::{AttemptOutcome, BacklogRepository, SaveOutcome, SharedBacklog, StoreResult};
pub use sqlite::SqliteBacklogRepository;

/// Open the configured SQLite backlog as a shared handle
pub fn open_backlog(
    config: &BacklogConfig,
    predicate: Arc<dyn CompletenessPredicate>,
) -> Result<SharedBacklog, StoreError> {
    let repo = SqliteBacklogRepository::new(&config.sqlite_path, predicate)?;
    Ok(Arc::new(repo))
}

/// Create an in-memory backlog as a shared handle
pub fn memory_backlog(predicate: Arc<dyn CompletenessPredicate>) -> SharedBacklog {
    Arc::new(MemoryBacklogRepository::new(predicate))
}
