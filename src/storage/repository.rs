//! Repository Pattern for the shared backlog
//!
//! This module defines the contract every backlog store fulfils. Workers,
//! the supervisor and the lease reaper only ever see an injected
//! [`SharedBacklog`] handle, never a process-wide connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Supervisor / WorkerLoop / Reaper               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BacklogRepository                        │
//! │  claim_batch, release_worker, release_all, save_detail ...  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//!       ┌─────────────────┐         ┌─────────────────┐
//!       │     SQLite      │         │     Memory      │
//!       │  Implementation │         │  Implementation │
//!       └─────────────────┘         └─────────────────┘
//! ```
//!
//! Lease fields (`lease_owner`, `lease_at`) are only mutated through the
//! claim/release/reclaim operations below. Detail and failure writes are
//! compare-and-set operations guarded by lease ownership.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    BacklogStats, ClaimedItem, ItemDetail, ItemId, RelatedEntity, RelationKind, WorkItem, WorkerId,
};
use crate::utils::error::StoreError;
use crate::utils::retry::AttemptPolicy;

/// Longest failure reason kept on an item
pub const MAX_ERROR_LEN: usize = 500;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a lease-guarded detail write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Completeness flag after the write
    pub complete: bool,
}

/// Result of recording a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Failed attempts so far, including this one
    pub attempts: u32,

    /// The item will never be claimed again
    pub poisoned: bool,

    /// Earliest time the item may be claimed again
    pub retry_at: Option<DateTime<Utc>>,
}

impl AttemptOutcome {
    /// Apply `policy` to an item that now has `attempts` failures
    pub fn from_policy(attempts: u32, policy: &AttemptPolicy, now: DateTime<Utc>) -> Self {
        let poisoned = policy.is_exhausted(attempts);
        let retry_at = if poisoned {
            None
        } else {
            let delay = policy.retry_delay(attempts);
            if delay.is_zero() {
                None
            } else {
                chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
            }
        };

        Self {
            attempts,
            poisoned,
            retry_at,
        }
    }
}

/// Instant before which a lease counts as expired, `None` if nothing can expire
pub fn lease_cutoff(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Shared backlog of work items with inline leases
#[async_trait]
pub trait BacklogRepository: Send + Sync {
    /// Add a pending, unleased item; returns the existing id for a known locator
    async fn enqueue(&self, locator: &str) -> StoreResult<ItemId>;

    /// Atomically lease up to `batch_size` claimable items, ascending by id
    ///
    /// An empty result means no pending, unleased item is currently claimable.
    async fn claim_batch(&self, worker: &WorkerId, batch_size: usize)
        -> StoreResult<Vec<ClaimedItem>>;

    /// Lease one specific item if it exists and is unleased
    async fn claim_item(&self, worker: &WorkerId, id: ItemId) -> StoreResult<Option<ClaimedItem>>;

    /// Clear every lease held by `worker`
    async fn release_worker(&self, worker: &WorkerId) -> StoreResult<usize>;

    /// Clear every lease regardless of owner
    async fn release_all(&self) -> StoreResult<usize>;

    /// Restart the lease clock on an item `worker` holds
    ///
    /// A lease that was reclaimed but not claimed again is retaken if the item
    /// is still claimable. Returns `false` when another worker holds the item
    /// or it is no longer eligible.
    async fn renew_lease(&self, id: ItemId, worker: &WorkerId) -> StoreResult<bool>;

    /// Clear leases acquired more than `ttl` ago
    async fn reclaim_expired(&self, ttl: Duration) -> StoreResult<usize>;

    /// Write a detail payload, provided `worker` holds the item's lease
    async fn save_detail(
        &self,
        id: ItemId,
        worker: &WorkerId,
        detail: &ItemDetail,
    ) -> StoreResult<SaveOutcome>;

    /// Count a failed attempt, provided `worker` holds the item's lease
    async fn record_failure(
        &self,
        id: ItemId,
        worker: &WorkerId,
        reason: &str,
        policy: &AttemptPolicy,
    ) -> StoreResult<AttemptOutcome>;

    /// Insert or rename an auxiliary lookup entity by natural key
    async fn upsert_entity(&self, kind: RelationKind, entity: &RelatedEntity) -> StoreResult<()>;

    /// Load a full item
    async fn get_item(&self, id: ItemId) -> StoreResult<Option<WorkItem>>;

    /// Backlog counters
    async fn stats(&self) -> StoreResult<BacklogStats>;
}

/// Type alias for a shared backlog handle
pub type SharedBacklog = Arc<dyn BacklogRepository>;
