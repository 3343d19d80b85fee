//! Error types for the harvester
//!
//! This module defines the domain errors raised by the backlog store, the
//! extractor, the rate limiter and the worker loop.

use thiserror::Error;

use crate::models::{ItemId, WorkerId};

/// Errors raised by a backlog store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Detail payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The writer no longer holds the item's lease
    #[error("Lease on item {item} is not held by worker {worker}")]
    LeaseLost { item: ItemId, worker: WorkerId },

    /// Item does not exist
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    /// Locator rejected at ingestion
    #[error("Invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// Store cannot be reached or its handle is unusable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failure makes the store unusable for the current worker
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Whether retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::LeaseLost { .. } => true,
            _ => false,
        }
    }
}

/// Errors that can occur while extracting an item's detail
#[derive(Error, Debug)]
pub enum ExtractError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Resource does not exist at the locator
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Response body could not be decoded into a detail payload
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Source demands an authenticated session
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Access still denied for this locator after a successful re-login
    #[error("Access denied after re-authentication: {0}")]
    Forbidden(String),

    /// Re-authentication requested without configured credentials
    #[error("Credentials are not configured")]
    MissingCredentials,

    /// Login was attempted and rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl ExtractError {
    /// Whether the failure ends the worker instead of a single item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired | Self::MissingCredentials | Self::AuthenticationFailed(_)
        )
    }

    /// Whether the request is worth retrying immediately
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ServerError(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Timeout => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Errors surfaced by the rate limiter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    /// The operation panicked or its dispatcher went away before settling it
    #[error("Throttled operation was cancelled before completing")]
    Cancelled,
}

/// Errors that terminate a worker loop
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Store failure outside per-item isolation
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Fatal authentication failure
    #[error("Extractor error: {0}")]
    Extract(#[from] ExtractError),

    /// Rate limiter failure
    #[error("Throttle error: {0}")]
    Throttle(#[from] ThrottleError),
}
