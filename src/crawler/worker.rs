//! Worker loop state machine
//!
//! A [`WorkerLoop`] drains the shared backlog under its own identity:
//!
//! ```text
//! Init ──► Claim ──► Process(batch) ──► Claim ──► ... ──► Done
//!            │                                          ▲
//!            └────────────── empty batch ───────────────┘
//! ```
//!
//! `Init` clears leases left behind by a previous run under the same worker
//! id. Every claimed item is pushed through the worker's own rate limiter in
//! claim order. Failures of a single item are recorded against that item and
//! never abort the batch; authentication and store-availability failures
//! halt the worker. `Done` always releases the worker's leases, whichever
//! way the loop ended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::fetcher::Extractor;
use super::instance::WorkerSettings;
use super::session::Session;
use super::throttle::RateLimiter;
use crate::metrics;
use crate::models::{ClaimedItem, ItemId, WorkerId};
use crate::storage::{SaveOutcome, SharedBacklog};
use crate::utils::error::{StoreError, ThrottleError, WorkerError};
use crate::utils::retry::AttemptPolicy;

/// Failure reason recorded when an extracted detail is still incomplete
pub const INCOMPLETE_REASON: &str = "incomplete detail";

// ============================================================================
// States and outcomes
// ============================================================================

/// Worker loop states
#[derive(Debug)]
pub enum WorkerState {
    Init,
    Claim,
    Process(Vec<ClaimedItem>),
    Done,
}

/// Result of processing one claimed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Detail saved and the item now satisfies the completeness predicate
    Completed,

    /// Detail saved but still incomplete; counted as a failed attempt
    Incomplete { poisoned: bool },

    /// Extraction or persistence failed; counted as a failed attempt
    Failed { poisoned: bool },

    /// Not attempted because the worker halted or lost the lease
    Skipped,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Incomplete { .. } => "incomplete",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(
            self,
            Self::Incomplete { poisoned: true } | Self::Failed { poisoned: true }
        )
    }
}

/// Summary of one worker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub batches: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub failed: usize,
    pub skipped: usize,
    pub poisoned: usize,
}

impl WorkerReport {
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            batches: 0,
            completed: 0,
            incomplete: 0,
            failed: 0,
            skipped: 0,
            poisoned: 0,
        }
    }

    /// Items that went through extraction
    pub fn processed(&self) -> usize {
        self.completed + self.incomplete + self.failed
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed => self.completed += 1,
            ItemOutcome::Incomplete { .. } => self.incomplete += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
        if outcome.is_poisoned() {
            self.poisoned += 1;
        }
    }
}

// ============================================================================
// Per-item processing
// ============================================================================

/// Everything one throttled item operation needs, cheap to clone into a task
#[derive(Clone)]
struct ItemProcessor {
    worker: WorkerId,
    store: SharedBacklog,
    extractor: Arc<dyn Extractor>,
    session: Arc<dyn Session>,
    policy: AttemptPolicy,
    halted: Arc<AtomicBool>,
}

impl ItemProcessor {
    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    async fn process(&self, item: ClaimedItem) -> Result<ItemOutcome, WorkerError> {
        if self.halted.load(Ordering::SeqCst) {
            return Ok(ItemOutcome::Skipped);
        }

        // A sweep may have handed the item to a peer since the claim
        match self.store.renew_lease(item.id, &self.worker).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(worker = %self.worker, item = %item.id, "Lease lost before extraction");
                return Ok(ItemOutcome::Skipped);
            }
            Err(e) if e.is_fatal() => {
                self.halt();
                return Err(e.into());
            }
            Err(e) => {
                warn!(worker = %self.worker, item = %item.id, error = %e, "Renewing lease failed");
                return Ok(ItemOutcome::Skipped);
            }
        }

        debug!(worker = %self.worker, item = %item.id, locator = %item.locator, "Extracting item");

        let detail = match self.extractor.extract(&item.locator, self.session.as_ref()).await {
            Ok(detail) => detail,
            Err(e) if e.is_fatal() => {
                self.halt();
                return Err(e.into());
            }
            Err(e) => {
                warn!(worker = %self.worker, item = %item.id, error = %e, "Extraction failed");
                let poisoned = self.record_attempt(&item, &e.to_string()).await?;
                return Ok(ItemOutcome::Failed { poisoned });
            }
        };

        match self.store.save_detail(item.id, &self.worker, &detail).await {
            Ok(SaveOutcome { complete: true }) => Ok(ItemOutcome::Completed),
            Ok(SaveOutcome { complete: false }) => {
                let poisoned = self.record_attempt(&item, INCOMPLETE_REASON).await?;
                Ok(ItemOutcome::Incomplete { poisoned })
            }
            Err(e) if e.is_fatal() => {
                self.halt();
                Err(e.into())
            }
            // Another worker owns the item now; its attempt is the one that counts
            Err(e @ StoreError::LeaseLost { .. }) => {
                warn!(worker = %self.worker, item = %item.id, error = %e, "Lease lost before save");
                Ok(ItemOutcome::Skipped)
            }
            Err(e) => {
                warn!(worker = %self.worker, item = %item.id, error = %e, "Persisting detail failed");
                let poisoned = self.record_attempt(&item, &e.to_string()).await?;
                Ok(ItemOutcome::Failed { poisoned })
            }
        }
    }

    /// Count a failed attempt; returns whether the item is now poisoned
    async fn record_attempt(&self, item: &ClaimedItem, reason: &str) -> Result<bool, WorkerError> {
        match self
            .store
            .record_failure(item.id, &self.worker, reason, &self.policy)
            .await
        {
            Ok(outcome) => {
                if outcome.poisoned {
                    warn!(
                        worker = %self.worker,
                        item = %item.id,
                        attempts = outcome.attempts,
                        "Item exceeded attempt limit and will not be reclaimed"
                    );
                }
                Ok(outcome.poisoned)
            }
            Err(e) if e.is_fatal() => {
                self.halt();
                Err(e.into())
            }
            Err(e) => {
                warn!(worker = %self.worker, item = %item.id, error = %e, "Recording attempt failed");
                Ok(false)
            }
        }
    }
}

// ============================================================================
// Worker Loop
// ============================================================================

/// Per-worker claim/process/release loop
pub struct WorkerLoop {
    processor: ItemProcessor,
    limiter: RateLimiter,
    batch_size: usize,
}

impl WorkerLoop {
    pub fn new(
        id: WorkerId,
        store: SharedBacklog,
        extractor: Arc<dyn Extractor>,
        session: Arc<dyn Session>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            processor: ItemProcessor {
                worker: id,
                store,
                extractor,
                session,
                policy: settings.attempt_policy,
                halted: Arc::new(AtomicBool::new(false)),
            },
            limiter: RateLimiter::new(settings.min_delay, settings.max_delay),
            batch_size: settings.batch_size.max(1),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.processor.worker
    }

    /// Whether a fatal error stopped this worker
    pub fn is_halted(&self) -> bool {
        self.processor.halted.load(Ordering::SeqCst)
    }

    /// Drain the backlog until a claim comes back empty
    ///
    /// The worker's leases are released before returning, on success and on
    /// error alike.
    pub async fn run(&self) -> Result<WorkerReport, WorkerError> {
        let _active = metrics::worker_started();
        let mut report = WorkerReport::new(self.id().clone());

        info!(worker = %self.id(), batch_size = self.batch_size, "Worker started");
        let result = self.drive(&mut report).await;

        self.cleanup().await;

        match &result {
            Ok(()) => info!(
                worker = %self.id(),
                batches = report.batches,
                completed = report.completed,
                incomplete = report.incomplete,
                failed = report.failed,
                poisoned = report.poisoned,
                "Worker finished"
            ),
            Err(e) => error!(worker = %self.id(), error = %e, "Worker stopped"),
        }

        result.map(|()| report)
    }

    async fn drive(&self, report: &mut WorkerReport) -> Result<(), WorkerError> {
        let store = &self.processor.store;
        let mut state = WorkerState::Init;

        loop {
            state = match state {
                WorkerState::Init => {
                    let stale = store.release_worker(self.id()).await?;
                    if stale > 0 {
                        info!(worker = %self.id(), released = stale, "Released stale leases");
                        metrics::record_released("worker", stale);
                    }
                    WorkerState::Claim
                }
                WorkerState::Claim => {
                    let batch = store.claim_batch(self.id(), self.batch_size).await?;
                    if batch.is_empty() {
                        debug!(worker = %self.id(), "No claimable items left");
                        WorkerState::Done
                    } else {
                        metrics::record_claimed(self.id().as_str(), batch.len());
                        WorkerState::Process(batch)
                    }
                }
                WorkerState::Process(batch) => {
                    self.process_batch(batch, report).await?;
                    WorkerState::Claim
                }
                WorkerState::Done => return Ok(()),
            };
        }
    }

    async fn process_batch(
        &self,
        batch: Vec<ClaimedItem>,
        report: &mut WorkerReport,
    ) -> Result<(), WorkerError> {
        let _timer = metrics::start_batch_timer(self.id().as_str());
        report.batches += 1;
        info!(worker = %self.id(), batch = report.batches, items = batch.len(), "Processing batch");

        // Queue the whole batch up front so the limiter paces it as one stream
        let pending: Vec<_> = batch
            .into_iter()
            .map(|item| {
                let id = item.id;
                let attempts = item.attempts;
                let processor = self.processor.clone();
                let settled = self
                    .limiter
                    .throttle(move || async move { processor.process(item).await });
                (id, attempts, settled)
            })
            .collect();

        let mut fatal = None;
        for (id, attempts, settled) in pending {
            match settled.await {
                Ok(Ok(outcome)) => {
                    info!(
                        worker = %self.id(),
                        item = %id,
                        outcome = outcome.as_str(),
                        attempts = attempts,
                        "Item processed"
                    );
                    metrics::record_item_outcome(self.id().as_str(), outcome.as_str());
                    report.record(outcome);
                }
                Ok(Err(e)) => {
                    error!(worker = %self.id(), item = %id, error = %e, "Fatal error, halting worker");
                    fatal.get_or_insert(e);
                }
                Err(ThrottleError::Cancelled) => {
                    error!(worker = %self.id(), item = %id, "Item processing panicked");
                    metrics::record_item_outcome(self.id().as_str(), "failed");
                    report.record(ItemOutcome::Failed { poisoned: false });
                }
            }
        }

        let released = self.processor.store.release_worker(self.id()).await;
        if let Some(e) = fatal {
            return Err(e);
        }
        let released = released?;
        metrics::record_released("worker", released);
        debug!(worker = %self.id(), released = released, "Batch leases released");

        Ok(())
    }

    /// Terminal cleanup, best effort
    async fn cleanup(&self) {
        match self.processor.store.release_worker(self.id()).await {
            Ok(released) => {
                metrics::record_released("worker", released);
                if released > 0 {
                    info!(worker = %self.id(), released = released, "Released leases on exit");
                }
            }
            Err(e) => {
                warn!(worker = %self.id(), error = %e, "Failed to release leases on exit");
            }
        }
    }

    /// Claim and process one specific item, then release it
    ///
    /// Returns `None` if the item does not exist or is leased by someone else.
    pub async fn process_single(&self, id: ItemId) -> Result<Option<ItemOutcome>, WorkerError> {
        let store = &self.processor.store;
        let Some(item) = store.claim_item(self.id(), id).await? else {
            info!(worker = %self.id(), item = %id, "Item is missing or leased elsewhere");
            return Ok(None);
        };

        let processor = self.processor.clone();
        let settled = self
            .limiter
            .throttle(move || async move { processor.process(item).await })
            .await;

        let released = store.release_worker(self.id()).await;
        let outcome = settled??;
        released?;

        info!(worker = %self.id(), item = %id, outcome = outcome.as_str(), "Item processed");
        metrics::record_item_outcome(self.id().as_str(), outcome.as_str());
        Ok(Some(outcome))
    }
}

impl std::fmt::Debug for WorkerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLoop")
            .field("id", self.id())
            .field("batch_size", &self.batch_size)
            .field("limiter", &self.limiter)
            .finish()
    }
}
