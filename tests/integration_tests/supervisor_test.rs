//! Supervised pools draining one shared backlog

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use harvester::crawler::mock::{MockExtractor, MockSessionFactory};
use harvester::crawler::WorkerSettings;
use harvester::models::{ItemDetail, WorkerId};
use harvester::scheduler::{Supervisor, WorkerOutcome};
use harvester::utils::retry::AttemptPolicy;

use crate::common::{fast_settings, memory_store, reopen, seed, sqlite_store};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_processes_each_item_exactly_once() {
    let (_dir, store) = sqlite_store();
    seed(&store, 7).await;

    let extractor = Arc::new(MockExtractor::titled());
    let sessions = Arc::new(MockSessionFactory::new());
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        extractor.clone(),
        sessions.clone(),
        fast_settings(5),
    )
    .worker_count(2);

    let report = supervisor.run().await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.completed(), 7);
    assert_eq!(sessions.opened(), 2);

    let mut calls: HashMap<String, usize> = HashMap::new();
    for locator in extractor.calls() {
        *calls.entry(locator).or_default() += 1;
    }
    assert_eq!(calls.len(), 7);
    assert!(calls.values().all(|&n| n == 1));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.complete, 7);
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_pool_recovers_leases_from_a_crashed_epoch() {
    let (dir, store) = sqlite_store();
    seed(&store, 6).await;

    // A previous run died holding leases under ids the new pool never uses
    {
        let previous = reopen(&dir);
        previous
            .claim_batch(&WorkerId::new("old-host-3").unwrap(), 4)
            .await
            .unwrap();
    }

    let supervisor = Supervisor::new(
        reopen(&dir),
        Arc::new(MockExtractor::titled()),
        Arc::new(MockSessionFactory::new()),
        fast_settings(2),
    )
    .worker_count(3);

    let report = supervisor.run().await.unwrap();
    assert_eq!(report.released_at_start, 4);
    assert_eq!(report.completed(), 6);
    assert_eq!(store.stats().await.unwrap().leased, 0);
}

#[tokio::test]
async fn test_failed_login_does_not_stop_other_workers() {
    let store = memory_store();
    seed(&store, 4).await;

    let sessions = Arc::new(MockSessionFactory::new().refuse("pool-0"));
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        Arc::new(MockExtractor::titled()),
        sessions.clone(),
        fast_settings(2),
    )
    .worker_count(2)
    .id_prefix("pool");

    let report = supervisor.run().await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed(), vec![&WorkerId::new("pool-0").unwrap()]);
    assert!(matches!(&report.outcomes[0], WorkerOutcome::Failed { .. }));
    assert_eq!(report.completed(), 4);
    assert_eq!(store.stats().await.unwrap().complete, 4);
}

#[tokio::test]
async fn test_pool_with_failing_items_terminates() {
    let store = memory_store();
    seed(&store, 5).await;

    let extractor = MockExtractor::new(|locator| {
        if locator.ends_with("/3") {
            Ok(ItemDetail::default())
        } else {
            Ok(ItemDetail {
                title: Some(locator.to_string()),
                ..Default::default()
            })
        }
    });
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        Arc::new(extractor),
        Arc::new(MockSessionFactory::new()),
        fast_settings(2),
    )
    .worker_count(3)
    .lease_ttl(Duration::from_secs(3600), Duration::from_millis(10));

    let report = supervisor.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.completed(), 4);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.complete, 4);
    assert_eq!(stats.poisoned, 1);
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_second_epoch_finds_nothing_to_do() {
    let (_dir, store) = sqlite_store();
    seed(&store, 3).await;

    let extractor = Arc::new(MockExtractor::titled());
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        extractor.clone(),
        Arc::new(MockSessionFactory::new()),
        fast_settings(3),
    )
    .worker_count(2);

    assert_eq!(supervisor.run().await.unwrap().completed(), 3);
    let again = supervisor.run().await.unwrap();
    assert_eq!(again.released_at_start, 0);
    assert_eq!(again.processed(), 0);
    assert_eq!(extractor.calls().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_short_lease_ttl_still_extracts_each_item_once() {
    let store = memory_store();
    seed(&store, 7).await;

    // A batch of five takes about 300ms to drain; leases expire after 100ms
    let settings = WorkerSettings::builder()
        .batch_size(5)
        .delay(Duration::from_millis(60), Duration::from_millis(60))
        .attempt_policy(AttemptPolicy::immediate(3))
        .build()
        .unwrap();
    let extractor = Arc::new(MockExtractor::titled());
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        extractor.clone(),
        Arc::new(MockSessionFactory::new()),
        settings,
    )
    .worker_count(2)
    .lease_ttl(Duration::from_millis(100), Duration::from_millis(10));

    let report = supervisor.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.completed(), 7);
    assert_eq!(report.processed(), 7);

    let mut calls: HashMap<String, usize> = HashMap::new();
    for locator in extractor.calls() {
        *calls.entry(locator).or_default() += 1;
    }
    assert_eq!(calls.len(), 7);
    assert!(calls.values().all(|&n| n == 1));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.complete, 7);
    assert_eq!(stats.leased, 0);
}
