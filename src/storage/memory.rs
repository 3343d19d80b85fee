//! In-memory backlog store
//!
//! Same semantics as the SQLite store, held behind one mutex so every
//! operation is trivially atomic. Used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::completeness::CompletenessPredicate;
use super::repository::{
    lease_cutoff, AttemptOutcome, BacklogRepository, SaveOutcome, StoreResult, MAX_ERROR_LEN,
};
use crate::models::{
    BacklogStats, ClaimedItem, ItemDetail, ItemId, Lease, RelatedEntity, RelationKind, WorkItem,
    WorkerId,
};
use crate::utils::error::StoreError;
use crate::utils::retry::AttemptPolicy;
use crate::utils::{truncate_text, validate_locator};

#[derive(Default)]
struct MemoryState {
    items: BTreeMap<ItemId, WorkItem>,
    entities: HashMap<(RelationKind, String), String>,
    next_id: i64,
}

impl MemoryState {
    fn leased_item_mut(&mut self, id: ItemId, worker: &WorkerId) -> StoreResult<&mut WorkItem> {
        let item = self.items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match &item.lease {
            Some(lease) if &lease.owner == worker => Ok(item),
            _ => Err(StoreError::LeaseLost {
                item: id,
                worker: worker.clone(),
            }),
        }
    }
}

/// Mutex-guarded in-memory implementation of [`BacklogRepository`]
pub struct MemoryBacklogRepository {
    state: Mutex<MemoryState>,
    predicate: Arc<dyn CompletenessPredicate>,
}

impl MemoryBacklogRepository {
    /// Create an empty backlog judged by `predicate`
    pub fn new(predicate: Arc<dyn CompletenessPredicate>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
            predicate,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory backlog mutex poisoned".to_string()))
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.items.len()).unwrap_or(0)
    }

    /// Check if the backlog holds no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name stored for a lookup entity
    pub fn entity_name(&self, kind: RelationKind, key: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|s| s.entities.get(&(kind, key.to_string())).cloned())
    }
}

#[async_trait]
impl BacklogRepository for MemoryBacklogRepository {
    async fn enqueue(&self, locator: &str) -> StoreResult<ItemId> {
        validate_locator(locator).map_err(|reason| StoreError::InvalidLocator {
            locator: locator.to_string(),
            reason,
        })?;
        let locator = locator.trim();

        let mut state = self.lock()?;
        if let Some(existing) = state.items.values().find(|item| item.locator == locator) {
            return Ok(existing.id);
        }

        let id = ItemId(state.next_id);
        state.next_id += 1;
        state.items.insert(id, WorkItem::new(id, locator));
        Ok(id)
    }

    async fn claim_batch(
        &self,
        worker: &WorkerId,
        batch_size: usize,
    ) -> StoreResult<Vec<ClaimedItem>> {
        let now = Utc::now();
        let mut state = self.lock()?;

        let claimed: Vec<ClaimedItem> = state
            .items
            .values_mut()
            .filter(|item| item.is_claimable(now))
            .take(batch_size)
            .map(|item| {
                item.lease = Some(Lease {
                    owner: worker.clone(),
                    acquired_at: now,
                });
                item.claimed()
            })
            .collect();

        Ok(claimed)
    }

    async fn claim_item(&self, worker: &WorkerId, id: ItemId) -> StoreResult<Option<ClaimedItem>> {
        let mut state = self.lock()?;
        match state.items.get_mut(&id) {
            Some(item) if item.lease.is_none() => {
                item.lease = Some(Lease {
                    owner: worker.clone(),
                    acquired_at: Utc::now(),
                });
                Ok(Some(item.claimed()))
            }
            _ => Ok(None),
        }
    }

    async fn release_worker(&self, worker: &WorkerId) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let mut released = 0;
        for item in state.items.values_mut() {
            if item.lease.as_ref().is_some_and(|l| &l.owner == worker) {
                item.lease = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn release_all(&self) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let mut released = 0;
        for item in state.items.values_mut() {
            if item.lease.take().is_some() {
                released += 1;
            }
        }
        Ok(released)
    }

    async fn renew_lease(&self, id: ItemId, worker: &WorkerId) -> StoreResult<bool> {
        let now = Utc::now();
        let mut state = self.lock()?;
        let Some(item) = state.items.get_mut(&id) else {
            return Ok(false);
        };
        let held = item.lease.as_ref().is_some_and(|l| &l.owner == worker);
        if !held && !item.is_claimable(now) {
            return Ok(false);
        }
        item.lease = Some(Lease {
            owner: worker.clone(),
            acquired_at: now,
        });
        Ok(true)
    }

    async fn reclaim_expired(&self, ttl: Duration) -> StoreResult<usize> {
        let Some(cutoff) = lease_cutoff(Utc::now(), ttl) else {
            return Ok(0);
        };

        let mut state = self.lock()?;
        let mut reclaimed = 0;
        for item in state.items.values_mut() {
            if item.lease.as_ref().is_some_and(|l| l.acquired_at < cutoff) {
                item.lease = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn save_detail(
        &self,
        id: ItemId,
        worker: &WorkerId,
        detail: &ItemDetail,
    ) -> StoreResult<SaveOutcome> {
        let complete_now = self.predicate.is_complete(detail);
        let mut state = self.lock()?;

        // Ownership is checked before any entity is touched
        state.leased_item_mut(id, worker)?;

        for kind in RelationKind::all() {
            for entity in detail.relations(kind) {
                state
                    .entities
                    .insert((kind, entity.key.clone()), entity.name.clone());
            }
        }

        let item = state.leased_item_mut(id, worker)?;
        item.detail = Some(detail.clone());
        item.complete = item.complete || complete_now;
        if item.complete {
            item.last_error = None;
            item.retry_at = None;
        }

        Ok(SaveOutcome {
            complete: item.complete,
        })
    }

    async fn record_failure(
        &self,
        id: ItemId,
        worker: &WorkerId,
        reason: &str,
        policy: &AttemptPolicy,
    ) -> StoreResult<AttemptOutcome> {
        let mut state = self.lock()?;
        let item = state.leased_item_mut(id, worker)?;

        let outcome = AttemptOutcome::from_policy(item.attempts + 1, policy, Utc::now());
        item.attempts = outcome.attempts;
        item.poisoned = outcome.poisoned;
        item.retry_at = outcome.retry_at;
        item.last_error = Some(truncate_text(reason, MAX_ERROR_LEN));

        Ok(outcome)
    }

    async fn upsert_entity(&self, kind: RelationKind, entity: &RelatedEntity) -> StoreResult<()> {
        let mut state = self.lock()?;
        state
            .entities
            .insert((kind, entity.key.clone()), entity.name.clone());
        Ok(())
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Option<WorkItem>> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    async fn stats(&self) -> StoreResult<BacklogStats> {
        let state = self.lock()?;
        let mut stats = BacklogStats {
            total: state.items.len(),
            ..Default::default()
        };

        for item in state.items.values() {
            if item.complete {
                stats.complete += 1;
            } else if item.poisoned {
                stats.poisoned += 1;
            } else {
                stats.pending += 1;
            }
            if item.lease.is_some() {
                stats.leased += 1;
            }
        }

        Ok(stats)
    }
}
