//! End-to-end extraction over HTTP
//!
//! A wiremock server plays both the login endpoint and the detail source;
//! the supervisor runs real sessions and the JSON extractor against it.

use std::sync::Arc;

use harvester::config::SessionConfig;
use harvester::crawler::{HttpExtractor, HttpSessionFactory};
use harvester::models::ItemId;
use harvester::scheduler::{Supervisor, WorkerOutcome};
use harvester::storage::{RequiredFields, SharedBacklog, SqliteBacklogRepository};
use harvester::utils::retry::RetryConfig;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{COMPLETE_DETAIL_JSON, MALFORMED_BODY, PARTIAL_DETAIL_JSON};
use crate::common::fast_settings;

/// Backlog requiring a title and every relationship collection
fn strict_store() -> (TempDir, SharedBacklog) {
    let dir = TempDir::new().unwrap();
    let repo = SqliteBacklogRepository::new(
        dir.path().join("backlog.db"),
        Arc::new(RequiredFields::default()),
    )
    .unwrap();
    (dir, Arc::new(repo))
}

fn session_config(server: &MockServer, with_credentials: bool) -> SessionConfig {
    let mut config = SessionConfig {
        login_url: Some(format!("{}/login", server.uri())),
        timeout_secs: 5,
        ..Default::default()
    };
    if with_credentials {
        config.username = Some("harvest".to_string());
        config.password = Some("s3cret".to_string());
    }
    config
}

fn supervisor(store: &SharedBacklog, sessions: SessionConfig, workers: usize) -> Supervisor {
    Supervisor::new(
        Arc::clone(store),
        Arc::new(HttpExtractor::with_retry(RetryConfig::with_delays(2, 1, 5))),
        Arc::new(HttpSessionFactory::new(sessions)),
        fast_settings(2),
    )
    .worker_count(workers)
}

async fn enqueue(store: &SharedBacklog, server: &MockServer, item: &str) -> ItemId {
    store
        .enqueue(&format!("{}/items/{item}", server.uri()))
        .await
        .unwrap()
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("username=harvest"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn mount_item(server: &MockServer, item: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/items/{item}")))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_payload_outcomes_end_to_end() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_item(&server, "complete", 200, COMPLETE_DETAIL_JSON).await;
    mount_item(&server, "partial", 200, PARTIAL_DETAIL_JSON).await;
    mount_item(&server, "broken", 200, MALFORMED_BODY).await;
    mount_item(&server, "missing", 404, "").await;

    let (_dir, store) = strict_store();
    let complete = enqueue(&store, &server, "complete").await;
    let partial = enqueue(&store, &server, "partial").await;
    let broken = enqueue(&store, &server, "broken").await;
    let missing = enqueue(&store, &server, "missing").await;

    let report = supervisor(&store, session_config(&server, true), 2)
        .run()
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.completed(), 1);

    let item = store.get_item(complete).await.unwrap().unwrap();
    assert!(item.complete);
    let detail = item.detail.unwrap();
    assert_eq!(detail.title.as_deref(), Some("The Left Hand of Darkness"));
    assert_eq!(detail.authors[0].name, "Ursula K. Le Guin");

    // Partial payloads are stored but keep the item pending until poisoned
    let item = store.get_item(partial).await.unwrap().unwrap();
    assert!(!item.complete);
    assert!(item.detail.is_some());
    assert!(item.poisoned);
    assert_eq!(item.last_error.as_deref(), Some("incomplete detail"));

    for id in [broken, missing] {
        let item = store.get_item(id).await.unwrap().unwrap();
        assert!(!item.complete);
        assert!(item.detail.is_none());
        assert!(item.poisoned);
        assert_eq!(item.attempts, 3);
    }

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.complete, 1);
    assert_eq!(stats.poisoned, 3);
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_item(&server, "flaky", 200, COMPLETE_DETAIL_JSON).await;

    let (_dir, store) = strict_store();
    let id = enqueue(&store, &server, "flaky").await;

    let report = supervisor(&store, session_config(&server, false), 1)
        .run()
        .await
        .unwrap();
    assert_eq!(report.completed(), 1);

    let item = store.get_item(id).await.unwrap().unwrap();
    assert!(item.complete);
    assert_eq!(item.attempts, 0);
}

#[tokio::test]
async fn test_expired_session_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items/guarded"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_item(&server, "guarded", 200, COMPLETE_DETAIL_JSON).await;

    let (_dir, store) = strict_store();
    let id = enqueue(&store, &server, "guarded").await;

    let report = supervisor(&store, session_config(&server, true), 1)
        .run()
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(store.get_item(id).await.unwrap().unwrap().complete);
}

#[tokio::test]
async fn test_auth_challenge_without_credentials_halts_worker() {
    let server = MockServer::start().await;
    mount_item(&server, "locked", 401, "").await;

    let (_dir, store) = strict_store();
    let id = enqueue(&store, &server, "locked").await;

    let report = supervisor(&store, session_config(&server, false), 1)
        .run()
        .await
        .unwrap();
    assert!(!report.is_success());
    assert!(matches!(&report.outcomes[0], WorkerOutcome::Failed { .. }));

    // The worker stopped; the item is released and not charged an attempt
    let item = store.get_item(id).await.unwrap().unwrap();
    assert!(item.lease.is_none());
    assert_eq!(item.attempts, 0);
}

#[tokio::test]
async fn test_rejected_login_fails_every_worker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let (_dir, store) = strict_store();
    enqueue(&store, &server, "anything").await;

    let report = supervisor(&store, session_config(&server, true), 2)
        .run()
        .await
        .unwrap();
    assert_eq!(report.failed().len(), 2);
    assert_eq!(report.processed(), 0);
    assert_eq!(store.stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_item_denied_after_relogin_is_poisoned_not_fatal() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_item(&server, "denied", 403, "").await;
    mount_item(&server, "open", 200, COMPLETE_DETAIL_JSON).await;

    let (_dir, store) = strict_store();
    let denied = enqueue(&store, &server, "denied").await;
    let open = enqueue(&store, &server, "open").await;

    let report = supervisor(&store, session_config(&server, true), 2)
        .run()
        .await
        .unwrap();

    // The denial is charged to the item, and no worker stops because of it
    assert!(report.is_success());
    assert_eq!(report.completed(), 1);
    assert!(store.get_item(open).await.unwrap().unwrap().complete);

    let item = store.get_item(denied).await.unwrap().unwrap();
    assert!(!item.complete);
    assert!(item.poisoned);
    assert_eq!(item.attempts, 3);
    assert!(item.last_error.unwrap().contains("Access denied"));
    assert_eq!(store.stats().await.unwrap().leased, 0);
}
