//! Worker loop tests against a file-backed backlog

use std::sync::Arc;

use harvester::crawler::mock::{MockExtractor, MockSession};
use harvester::crawler::{WorkerLoop, WorkerSettings};
use harvester::models::{ItemDetail, WorkerId};
use harvester::storage::SharedBacklog;
use harvester::utils::error::{ExtractError, WorkerError};

use crate::common::{fast_settings, reopen, seed, sqlite_store};

fn worker_loop(
    id: &str,
    store: SharedBacklog,
    extractor: MockExtractor,
    settings: WorkerSettings,
) -> WorkerLoop {
    WorkerLoop::new(
        WorkerId::new(id).unwrap(),
        store,
        Arc::new(extractor),
        Arc::new(MockSession::new()),
        settings,
    )
}

#[tokio::test]
async fn test_worker_drains_sqlite_backlog() {
    let (_dir, store) = sqlite_store();
    seed(&store, 7).await;

    let worker = worker_loop("w1", Arc::clone(&store), MockExtractor::titled(), fast_settings(3));
    let report = worker.run().await.unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(report.completed, 7);
    assert_eq!(report.processed(), 7);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.complete, 7);
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_restarted_worker_recovers_its_own_leases() {
    let (dir, store) = sqlite_store();
    seed(&store, 5).await;

    // First incarnation claims a batch and dies without releasing it
    {
        let crashed = reopen(&dir);
        let claimed = crashed
            .claim_batch(&WorkerId::new("worker-0").unwrap(), 3)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 3);
    }

    let restarted = worker_loop("worker-0", reopen(&dir), MockExtractor::titled(), fast_settings(2));
    let report = restarted.run().await.unwrap();

    assert_eq!(report.completed, 5);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.complete, 5);
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_foreign_leases_block_until_released() {
    let (dir, store) = sqlite_store();
    seed(&store, 4).await;
    store
        .claim_batch(&WorkerId::new("gone").unwrap(), 2)
        .await
        .unwrap();

    let worker = worker_loop("w1", reopen(&dir), MockExtractor::titled(), fast_settings(2));
    assert_eq!(worker.run().await.unwrap().completed, 2);
    assert_eq!(store.stats().await.unwrap().leased, 2);

    // Global release (what a supervisor does on startup) frees them
    assert_eq!(store.release_all().await.unwrap(), 2);
    let worker = worker_loop("w1", reopen(&dir), MockExtractor::titled(), fast_settings(2));
    assert_eq!(worker.run().await.unwrap().completed, 2);
    assert_eq!(store.stats().await.unwrap().complete, 4);
}

#[tokio::test]
async fn test_halted_worker_can_be_resumed() {
    let (dir, store) = sqlite_store();
    let ids = seed(&store, 5).await;

    let broken = MockExtractor::new(|locator| {
        if locator.ends_with("/1") {
            Err(ExtractError::MissingCredentials)
        } else {
            Ok(ItemDetail {
                title: Some(locator.to_string()),
                ..Default::default()
            })
        }
    });
    let worker = worker_loop("w1", reopen(&dir), broken, fast_settings(3));
    let err = worker.run().await.unwrap_err();
    assert!(matches!(err, WorkerError::Extract(ExtractError::MissingCredentials)));
    assert!(worker.is_halted());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.leased, 0);
    assert!(stats.complete < 5);
    assert_eq!(store.get_item(ids[1]).await.unwrap().unwrap().attempts, 0);

    let worker = worker_loop("w1", reopen(&dir), MockExtractor::titled(), fast_settings(3));
    worker.run().await.unwrap();
    assert_eq!(store.stats().await.unwrap().complete, 5);
}

#[tokio::test]
async fn test_persistently_incomplete_item_is_poisoned() {
    let (_dir, store) = sqlite_store();
    let ids = seed(&store, 2).await;

    let extractor = MockExtractor::new(|locator| {
        if locator.ends_with("/0") {
            Ok(ItemDetail::default())
        } else {
            Ok(ItemDetail {
                title: Some("ok".to_string()),
                ..Default::default()
            })
        }
    });
    let worker = worker_loop("w1", Arc::clone(&store), extractor, fast_settings(5));
    let report = worker.run().await.unwrap();

    // fast_settings allows three attempts
    assert_eq!(report.completed, 1);
    assert_eq!(report.incomplete, 3);
    assert_eq!(report.poisoned, 1);

    let item = store.get_item(ids[0]).await.unwrap().unwrap();
    assert!(item.poisoned);
    assert!(!item.complete);
    assert_eq!(item.attempts, 3);
    assert!(item.detail.is_some());
}

#[tokio::test]
async fn test_process_single_on_sqlite() {
    let (_dir, store) = sqlite_store();
    let ids = seed(&store, 3).await;

    let extractor = MockExtractor::titled();
    let worker = worker_loop("w1", Arc::clone(&store), extractor, fast_settings(1));

    let outcome = worker.process_single(ids[2]).await.unwrap();
    assert!(outcome.is_some());
    let item = store.get_item(ids[2]).await.unwrap().unwrap();
    assert!(item.complete);
    assert!(item.lease.is_none());

    // Completed items can still be targeted explicitly
    assert!(worker.process_single(ids[2]).await.unwrap().is_some());
    assert_eq!(store.stats().await.unwrap().complete, 1);
}
