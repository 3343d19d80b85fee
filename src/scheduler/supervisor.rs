//! Worker pool supervisor
//!
//! The supervisor owns one scheduling epoch: it clears every lease left over
//! from a previous run, starts a fixed pool of isolated worker loops as tokio
//! tasks, waits for all of them and aggregates their outcomes. A failed
//! worker is reported, never retried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::reaper::{LeaseReaper, ReaperHandle};
use crate::config::Config;
use crate::crawler::{Extractor, ItemOutcome, SessionFactory, WorkerLoop, WorkerReport, WorkerSettings};
use crate::metrics;
use crate::models::{ItemId, WorkerId};
use crate::storage::{SharedBacklog, StoreResult};
use crate::utils::error::WorkerError;

// ============================================================================
// Outcomes
// ============================================================================

/// How one supervised worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Ran until the backlog was drained
    Finished(WorkerReport),

    /// Stopped on a fatal error
    Failed { worker: WorkerId, error: String },

    /// The worker task panicked
    Panicked { worker: WorkerId },
}

impl WorkerOutcome {
    pub fn worker(&self) -> &WorkerId {
        match self {
            Self::Finished(report) => &report.worker,
            Self::Failed { worker, .. } | Self::Panicked { worker } => worker,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn report(&self) -> Option<&WorkerReport> {
        match self {
            Self::Finished(report) => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished(r) => write!(
                f,
                "{}: finished ({} batches, {} completed, {} incomplete, {} failed, {} poisoned)",
                r.worker, r.batches, r.completed, r.incomplete, r.failed, r.poisoned
            ),
            Self::Failed { worker, error } => write!(f, "{worker}: failed ({error})"),
            Self::Panicked { worker } => write!(f, "{worker}: panicked"),
        }
    }
}

/// Aggregate result of one supervised epoch
#[derive(Debug, Clone)]
pub struct SupervisorReport {
    /// Identifier of the epoch, shared by its log lines
    pub epoch: Uuid,

    /// Leases cleared by the global sweep before workers started
    pub released_at_start: usize,

    /// Per-worker outcomes in worker order
    pub outcomes: Vec<WorkerOutcome>,
}

impl SupervisorReport {
    /// Whether every worker finished
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(WorkerOutcome::is_success)
    }

    /// Workers that did not finish
    pub fn failed(&self) -> Vec<&WorkerId> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(WorkerOutcome::worker)
            .collect()
    }

    /// Items that went through extraction across all finished workers
    pub fn processed(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(WorkerOutcome::report)
            .map(WorkerReport::processed)
            .sum()
    }

    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(WorkerOutcome::report)
            .map(|r| r.completed)
            .sum()
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Fixed-size pool of isolated worker loops over one shared backlog
#[derive(Clone)]
pub struct Supervisor {
    store: SharedBacklog,
    extractor: Arc<dyn Extractor>,
    sessions: Arc<dyn SessionFactory>,
    settings: WorkerSettings,
    worker_count: usize,
    id_prefix: String,
    lease_ttl: Option<Duration>,
    sweep_interval: Duration,
}

impl Supervisor {
    /// Create a single-worker supervisor with default naming and no lease TTL
    pub fn new(
        store: SharedBacklog,
        extractor: Arc<dyn Extractor>,
        sessions: Arc<dyn SessionFactory>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            sessions,
            settings,
            worker_count: 1,
            id_prefix: "worker".to_string(),
            lease_ttl: None,
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Create a supervisor configured from the application configuration
    pub fn from_config(
        config: &Config,
        store: SharedBacklog,
        extractor: Arc<dyn Extractor>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        let supervisor = Self::new(store, extractor, sessions, WorkerSettings::from_config(config))
            .worker_count(config.worker.count)
            .id_prefix(&config.worker.id_prefix);

        match config.lease_ttl() {
            Some(ttl) => supervisor.lease_ttl(ttl, config.sweep_interval()),
            None => supervisor,
        }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn id_prefix(mut self, prefix: &str) -> Self {
        self.id_prefix = prefix.to_string();
        self
    }

    /// Reclaim leases older than `ttl` every `sweep_interval` while running
    pub fn lease_ttl(mut self, ttl: Duration, sweep_interval: Duration) -> Self {
        self.lease_ttl = Some(ttl);
        self.sweep_interval = sweep_interval;
        self
    }

    /// Worker ids of the pool, `{prefix}-{n}`
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        (0..self.worker_count)
            .map(|n| WorkerId::indexed(&self.id_prefix, n))
            .collect()
    }

    /// Run one epoch to completion
    ///
    /// Fails only if the initial global lease sweep fails; worker failures
    /// are reported in the returned [`SupervisorReport`].
    pub async fn run(&self) -> StoreResult<SupervisorReport> {
        let epoch = Uuid::new_v4();
        let released_at_start = self.store.release_all().await?;
        metrics::record_released("all", released_at_start);
        info!(
            epoch = %epoch,
            workers = self.worker_count,
            released = released_at_start,
            "Starting worker pool"
        );

        let reaper = self.spawn_reaper();

        let handles: Vec<_> = self
            .worker_ids()
            .into_iter()
            .map(|id| {
                let task = self.worker_task(id.clone());
                (id, tokio::spawn(task))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(report)) => WorkerOutcome::Finished(report),
                Ok(Err(e)) => WorkerOutcome::Failed {
                    worker: id,
                    error: e.to_string(),
                },
                Err(join_error) => {
                    error!(worker = %id, error = %join_error, "Worker task aborted");
                    self.release_abandoned(&id).await;
                    WorkerOutcome::Panicked { worker: id }
                }
            };
            outcomes.push(outcome);
        }

        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }

        let report = SupervisorReport {
            epoch,
            released_at_start,
            outcomes,
        };
        if report.is_success() {
            info!(epoch = %epoch, completed = report.completed(), "Worker pool finished");
        } else {
            warn!(epoch = %epoch, failed = report.failed().len(), "Worker pool finished with failures");
        }
        Ok(report)
    }

    /// Run one worker identity to completion outside a pool
    pub async fn run_worker(&self, id: WorkerId) -> Result<WorkerReport, WorkerError> {
        self.worker_task(id).await
    }

    /// Process one specific item under `worker`
    pub async fn run_single(
        &self,
        worker: WorkerId,
        item: ItemId,
    ) -> Result<Option<ItemOutcome>, WorkerError> {
        let session = self.sessions.open(&worker).await?;
        let worker_loop = WorkerLoop::new(
            worker,
            Arc::clone(&self.store),
            Arc::clone(&self.extractor),
            session,
            self.settings.clone(),
        );
        worker_loop.process_single(item).await
    }

    fn worker_task(
        &self,
        id: WorkerId,
    ) -> impl std::future::Future<Output = Result<WorkerReport, WorkerError>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let extractor = Arc::clone(&self.extractor);
        let sessions = Arc::clone(&self.sessions);
        let settings = self.settings.clone();

        async move {
            let session = sessions.open(&id).await?;
            WorkerLoop::new(id, store, extractor, session, settings)
                .run()
                .await
        }
    }

    fn spawn_reaper(&self) -> Option<ReaperHandle> {
        self.lease_ttl.map(|ttl| {
            info!(ttl_secs = ttl.as_secs(), "Starting lease reaper");
            LeaseReaper::new(Arc::clone(&self.store), ttl, self.sweep_interval).spawn()
        })
    }

    async fn release_abandoned(&self, id: &WorkerId) {
        match self.store.release_worker(id).await {
            Ok(released) => {
                metrics::record_released("worker", released);
                info!(worker = %id, released = released, "Released leases of aborted worker");
            }
            Err(e) => warn!(worker = %id, error = %e, "Could not release leases of aborted worker"),
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("worker_count", &self.worker_count)
            .field("id_prefix", &self.id_prefix)
            .field("settings", &self.settings)
            .field("lease_ttl", &self.lease_ttl)
            .finish()
    }
}
