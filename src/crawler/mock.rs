//! In-process stand-ins for the session and extractor seams
//!
//! Used by tests and dry runs where no real source is reachable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Client;

use super::fetcher::Extractor;
use super::session::{Session, SessionFactory};
use crate::models::{ItemDetail, WorkerId};
use crate::utils::error::ExtractError;

type ExtractFn = dyn Fn(&str) -> Result<ItemDetail, ExtractError> + Send + Sync;

/// Session with a plain client whose refresh always succeeds
#[derive(Debug, Default)]
pub struct MockSession {
    client: Client,
    refreshes: AtomicUsize,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    fn client(&self) -> &Client {
        &self.client
    }

    async fn refresh(&self) -> Result<(), ExtractError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`MockSession`]s, optionally refusing some workers
#[derive(Debug, Default)]
pub struct MockSessionFactory {
    refused: Mutex<HashSet<String>>,
    opened: AtomicUsize,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail with an authentication error for `worker`
    pub fn refuse(self, worker: &str) -> Self {
        if let Ok(mut refused) = self.refused.lock() {
            refused.insert(worker.to_string());
        }
        self
    }

    /// Sessions opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self, worker: &WorkerId) -> Result<Arc<dyn Session>, ExtractError> {
        let refused = self
            .refused
            .lock()
            .map(|r| r.contains(worker.as_str()))
            .unwrap_or(false);
        if refused {
            return Err(ExtractError::AuthenticationFailed(format!(
                "login refused for {worker}"
            )));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession::new()))
    }
}

/// Extractor answering from a closure over the locator
pub struct MockExtractor {
    respond: Box<ExtractFn>,
    calls: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Result<ItemDetail, ExtractError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Extractor returning a titled detail for every locator
    pub fn titled() -> Self {
        Self::new(|locator| {
            Ok(ItemDetail {
                title: Some(format!("Detail for {locator}")),
                ..Default::default()
            })
        })
    }

    /// Locators extracted so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        locator: &str,
        _session: &dyn Session,
    ) -> Result<ItemDetail, ExtractError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(locator.to_string());
        }
        (self.respond)(locator)
    }
}
