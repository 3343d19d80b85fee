//! Detail extraction over HTTP
//!
//! The [`Extractor`] turns a work item's locator into an [`ItemDetail`]
//! using the worker's authenticated session. [`HttpExtractor`] expects the
//! source to serve the detail payload as JSON and handles:
//! - Retry with exponential backoff on 429/5xx and timeouts
//! - A single re-authentication when the source answers 401/403

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::session::Session;
use crate::models::ItemDetail;
use crate::utils::error::ExtractError;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// External data-collection step for one work item
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Produce the detail payload for `locator`
    async fn extract(&self, locator: &str, session: &dyn Session)
        -> Result<ItemDetail, ExtractError>;
}

/// JSON detail extractor with retry and re-authentication
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    retry: RetryConfig,
}

impl Default for HttpExtractor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl HttpExtractor {
    /// Create an extractor retrying transient failures up to `max_retries` times
    pub fn new(max_retries: u32) -> Self {
        Self {
            retry: RetryConfig::new(max_retries),
        }
    }

    /// Create an extractor with a custom backoff
    pub fn with_retry(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// Classify a status code that is not a success
    ///
    /// 401/403 require authentication, 404 is permanent, everything else is
    /// reported as a server error and retried only if transient.
    fn status_error(status: StatusCode, locator: &str) -> ExtractError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ExtractError::AuthenticationRequired
            }
            StatusCode::NOT_FOUND => ExtractError::NotFound(locator.to_string()),
            other => ExtractError::ServerError(other.as_u16()),
        }
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    async fn fetch_once(&self, client: &Client, locator: &str) -> Result<ItemDetail, ExtractError> {
        let response = client
            .get(locator)
            .headers(Self::build_headers())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Timeout
                } else {
                    ExtractError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, locator));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ExtractError::Decode(e.to_string()))
    }

    async fn fetch_with_retry(
        &self,
        client: &Client,
        locator: &str,
    ) -> Result<ItemDetail, ExtractError> {
        with_retry_if(
            &self.retry,
            || self.fetch_once(client, locator),
            ExtractError::is_transient,
        )
        .await
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        locator: &str,
        session: &dyn Session,
    ) -> Result<ItemDetail, ExtractError> {
        match self.fetch_with_retry(session.client(), locator).await {
            Err(ExtractError::AuthenticationRequired) => {
                warn!(locator = locator, "Source requires authentication, refreshing session");
                session.refresh().await?;
                debug!(locator = locator, "Retrying after re-authentication");
                match self.fetch_with_retry(session.client(), locator).await {
                    // The session is valid, so the denial belongs to this item
                    Err(ExtractError::AuthenticationRequired) => {
                        Err(ExtractError::Forbidden(locator.to_string()))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}
