//! Authenticated HTTP sessions
//!
//! Every worker opens its own [`Session`] through a [`SessionFactory`]. The
//! extractor borrows the session's client for requests and asks the session
//! to re-authenticate when the source answers with an auth challenge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::models::WorkerId;
use crate::utils::error::ExtractError;

/// Authenticated HTTP capability handed to the extractor
#[async_trait]
pub trait Session: Send + Sync {
    /// Client carrying the session's cookies
    fn client(&self) -> &Client;

    /// Re-run the login flow
    async fn refresh(&self) -> Result<(), ExtractError>;
}

/// Opens one session per worker
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, worker: &WorkerId) -> Result<Arc<dyn Session>, ExtractError>;
}

// ============================================================================
// Credential-based session
// ============================================================================

/// Cookie-backed session that logs in with a username and password form post
pub struct CredentialSession {
    client: Client,
    config: SessionConfig,
    worker: WorkerId,
    authenticated: AtomicBool,
}

impl CredentialSession {
    /// Build the session's HTTP client without logging in
    pub fn new(worker: WorkerId, config: SessionConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            config,
            worker,
            authenticated: AtomicBool::new(false),
        })
    }

    /// Whether the last login attempt succeeded
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// Log in at startup
    ///
    /// Missing credentials only produce a warning: the worker proceeds
    /// unauthenticated and returns `Ok(false)`.
    pub async fn login(&self) -> Result<bool, ExtractError> {
        if !self.config.has_credentials() {
            warn!(
                worker = %self.worker,
                "No credentials configured, continuing unauthenticated"
            );
            return Ok(false);
        }

        self.authenticate().await?;
        Ok(true)
    }

    async fn authenticate(&self) -> Result<(), ExtractError> {
        let (Some(username), Some(password)) =
            (self.config.username.as_deref(), self.config.password.as_deref())
        else {
            return Err(ExtractError::MissingCredentials);
        };
        let Some(login_url) = self.config.login_url.as_deref() else {
            return Err(ExtractError::AuthenticationFailed(
                "login URL is not configured".to_string(),
            ));
        };

        self.authenticated.store(false, Ordering::Relaxed);
        debug!(worker = %self.worker, url = login_url, "Posting login form");

        let response = self
            .client
            .post(login_url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::AuthenticationFailed(format!(
                "login returned HTTP {}",
                status.as_u16()
            )));
        }

        self.authenticated.store(true, Ordering::Relaxed);
        info!(worker = %self.worker, "Session authenticated");
        Ok(())
    }
}

#[async_trait]
impl Session for CredentialSession {
    fn client(&self) -> &Client {
        &self.client
    }

    async fn refresh(&self) -> Result<(), ExtractError> {
        if !self.config.has_credentials() {
            return Err(ExtractError::MissingCredentials);
        }
        info!(worker = %self.worker, "Re-authenticating session");
        self.authenticate().await
    }
}

/// Factory producing a logged-in [`CredentialSession`] per worker
#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    config: SessionConfig,
}

impl HttpSessionFactory {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self, worker: &WorkerId) -> Result<Arc<dyn Session>, ExtractError> {
        let session = CredentialSession::new(worker.clone(), self.config.clone())?;
        session.login().await?;
        Ok(Arc::new(session))
    }
}
