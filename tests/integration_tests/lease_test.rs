//! Lease protocol integration tests
//!
//! Exercises claim, release and lease-guarded writes against the SQLite
//! store (including several connections to one file) and the in-memory
//! store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use harvester::models::{ItemDetail, ItemId, WorkerId};
use harvester::storage::SharedBacklog;
use harvester::utils::error::StoreError;
use harvester::utils::retry::AttemptPolicy;
use proptest::prelude::*;

use crate::common::{memory_store, reopen, seed, sqlite_store, titled_detail};

fn worker(id: &str) -> WorkerId {
    WorkerId::new(id).unwrap()
}

// ============================================================================
// Claim correctness
// ============================================================================

async fn assert_claim_min_of_batch_and_pending(store: SharedBacklog) {
    let ids = seed(&store, 4).await;

    let first = store.claim_batch(&worker("w1"), 3).await.unwrap();
    let claimed: Vec<ItemId> = first.iter().map(|c| c.id).collect();
    assert_eq!(claimed, ids[..3].to_vec());

    for id in &claimed {
        let item = store.get_item(*id).await.unwrap().unwrap();
        assert_eq!(item.lease.unwrap().owner, worker("w1"));
    }

    // Only one pending item left unleased
    let second = store.claim_batch(&worker("w2"), 3).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, ids[3]);

    assert!(store.claim_batch(&worker("w3"), 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_claim_returns_min_of_batch_and_pending_sqlite() {
    let (_dir, store) = sqlite_store();
    assert_claim_min_of_batch_and_pending(store).await;
}

#[tokio::test]
async fn test_claim_returns_min_of_batch_and_pending_memory() {
    assert_claim_min_of_batch_and_pending(memory_store()).await;
}

#[tokio::test]
async fn test_claim_on_empty_backlog() {
    let (_dir, store) = sqlite_store();
    assert!(store.claim_batch(&worker("w1"), 5).await.unwrap().is_empty());
}

// ============================================================================
// No duplicate assignment
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_overlap_across_connections() {
    let (dir, store) = sqlite_store();
    seed(&store, 40).await;

    // Each task gets its own connection to the same database file
    let mut handles = Vec::new();
    for n in 0..8 {
        let handle = reopen(&dir);
        handles.push(tokio::spawn(async move {
            let id = WorkerId::indexed("w", n);
            let mut mine = Vec::new();
            loop {
                let batch = handle.claim_batch(&id, 3).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|c| c.id));
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "item {id} was claimed twice");
        }
    }
    assert_eq!(seen.len(), 40);
    assert_eq!(store.stats().await.unwrap().leased, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_overlap_memory() {
    let store = memory_store();
    seed(&store, 25).await;

    let mut handles = Vec::new();
    for n in 0..5 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .claim_batch(&WorkerId::indexed("w", n), 10)
                .await
                .unwrap()
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for item in handle.await.unwrap() {
            assert!(seen.insert(item.id));
        }
    }
    assert_eq!(seen.len(), 25);
}

// ============================================================================
// Release and crash recovery
// ============================================================================

#[tokio::test]
async fn test_release_worker_is_scoped_and_idempotent() {
    let (_dir, store) = sqlite_store();
    seed(&store, 4).await;
    store.claim_batch(&worker("w1"), 2).await.unwrap();
    store.claim_batch(&worker("w2"), 2).await.unwrap();

    assert_eq!(store.release_worker(&worker("w1")).await.unwrap(), 2);
    assert_eq!(store.release_worker(&worker("w1")).await.unwrap(), 0);
    assert_eq!(store.release_worker(&worker("nobody")).await.unwrap(), 0);
    assert_eq!(store.stats().await.unwrap().leased, 2);
}

#[tokio::test]
async fn test_crash_recovery_with_release_all() {
    let (dir, store) = sqlite_store();
    seed(&store, 5).await;

    // A worker claims and "crashes": its handle is dropped without releasing
    {
        let crashed = reopen(&dir);
        assert_eq!(crashed.claim_batch(&worker("crashed"), 3).await.unwrap().len(), 3);
    }

    let reopened = reopen(&dir);
    assert_eq!(reopened.stats().await.unwrap().leased, 3);
    assert_eq!(reopened.claim_batch(&worker("w2"), 5).await.unwrap().len(), 2);

    assert_eq!(reopened.release_all().await.unwrap(), 5);
    assert_eq!(reopened.stats().await.unwrap().leased, 0);
    assert_eq!(reopened.claim_batch(&worker("w3"), 10).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_reclaim_expired_leases() {
    let (_dir, store) = sqlite_store();
    seed(&store, 2).await;
    store.claim_batch(&worker("w1"), 2).await.unwrap();

    assert_eq!(store.reclaim_expired(Duration::from_secs(3600)).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.reclaim_expired(Duration::from_millis(1)).await.unwrap(), 2);
    assert_eq!(store.claim_batch(&worker("w2"), 5).await.unwrap().len(), 2);
}

// ============================================================================
// Lease-guarded writes
// ============================================================================

#[tokio::test]
async fn test_writes_require_lease_ownership() {
    let (_dir, store) = sqlite_store();
    let ids = seed(&store, 1).await;
    store.claim_batch(&worker("w1"), 1).await.unwrap();

    let err = store
        .save_detail(ids[0], &worker("w2"), &titled_detail("stolen"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseLost { .. }));

    let err = store
        .record_failure(ids[0], &worker("w2"), "boom", &AttemptPolicy::immediate(3))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseLost { .. }));

    let item = store.get_item(ids[0]).await.unwrap().unwrap();
    assert!(item.detail.is_none());
    assert_eq!(item.attempts, 0);
}

#[tokio::test]
async fn test_save_after_lease_reclaimed_is_rejected() {
    let (_dir, store) = sqlite_store();
    let ids = seed(&store, 1).await;
    store.claim_batch(&worker("slow"), 1).await.unwrap();

    store.release_all().await.unwrap();
    store.claim_batch(&worker("fast"), 1).await.unwrap();

    let err = store
        .save_detail(ids[0], &worker("slow"), &titled_detail("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseLost { .. }));
}

// ============================================================================
// Completeness and attempts
// ============================================================================

async fn assert_complete_items_are_never_reclaimed(store: SharedBacklog) {
    let ids = seed(&store, 2).await;
    store.claim_batch(&worker("w1"), 2).await.unwrap();

    let saved = store
        .save_detail(ids[0], &worker("w1"), &titled_detail("done"))
        .await
        .unwrap();
    assert!(saved.complete);
    store.release_worker(&worker("w1")).await.unwrap();

    // An unrelated, incomplete payload write does not make it pending again
    store.claim_item(&worker("w2"), ids[0]).await.unwrap().unwrap();
    let saved = store
        .save_detail(ids[0], &worker("w2"), &ItemDetail::default())
        .await
        .unwrap();
    assert!(saved.complete);
    store.release_worker(&worker("w2")).await.unwrap();

    let claimed = store.claim_batch(&worker("w3"), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, ids[1]);
}

#[tokio::test]
async fn test_complete_items_are_never_reclaimed_sqlite() {
    let (_dir, store) = sqlite_store();
    assert_complete_items_are_never_reclaimed(store).await;
}

#[tokio::test]
async fn test_complete_items_are_never_reclaimed_memory() {
    assert_complete_items_are_never_reclaimed(memory_store()).await;
}

#[tokio::test]
async fn test_poisoned_items_are_skipped() {
    let (_dir, store) = sqlite_store();
    let ids = seed(&store, 1).await;
    let policy = AttemptPolicy::immediate(2);

    for attempt in 1..=2 {
        let claimed = store.claim_batch(&worker("w1"), 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let outcome = store
            .record_failure(ids[0], &worker("w1"), "upstream error", &policy)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, attempt);
        store.release_worker(&worker("w1")).await.unwrap();
    }

    assert!(store.claim_batch(&worker("w1"), 1).await.unwrap().is_empty());
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.poisoned, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_backoff_delays_reclaim() {
    let (_dir, store) = sqlite_store();
    let ids = seed(&store, 1).await;
    let policy = AttemptPolicy::default();

    store.claim_batch(&worker("w1"), 1).await.unwrap();
    let outcome = store
        .record_failure(ids[0], &worker("w1"), "timeout", &policy)
        .await
        .unwrap();
    assert!(outcome.retry_at.is_some());
    store.release_worker(&worker("w1")).await.unwrap();

    assert!(store.claim_batch(&worker("w1"), 1).await.unwrap().is_empty());
    let item = store.get_item(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.last_error.as_deref(), Some("timeout"));
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any sequence of claims hands out each pending item at most once, in
    /// ascending order per claim, and never more than requested
    #[test]
    fn prop_claim_sequences_are_disjoint(
        pending in 0usize..30,
        batches in prop::collection::vec(1usize..8, 1..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = memory_store();
            seed(&store, pending).await;

            let mut seen = HashSet::new();
            let mut remaining = pending;
            for (n, batch_size) in batches.iter().enumerate() {
                let claimed = store
                    .claim_batch(&WorkerId::indexed("p", n), *batch_size)
                    .await
                    .unwrap();

                prop_assert_eq!(claimed.len(), (*batch_size).min(remaining));
                prop_assert!(claimed.windows(2).all(|w| w[0].id < w[1].id));
                for item in &claimed {
                    prop_assert!(seen.insert(item.id));
                }
                remaining -= claimed.len();
            }
            Ok(())
        })?;
    }
}
