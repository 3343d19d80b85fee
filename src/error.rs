//! Unified error handling for the harvester crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`HarvesterErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::config::ConfigError;
pub use crate::utils::error::{ExtractError, StoreError, ThrottleError, WorkerError};

/// Common trait for all harvester error types
pub trait HarvesterErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout)
    Network,
    /// Authentication and session errors
    Auth,
    /// Payload decoding errors
    Parsing,
    /// Backlog store and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl HarvesterErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        StoreError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Serialization(_) => ErrorCategory::Parsing,
            StoreError::InvalidLocator { .. } => ErrorCategory::Config,
            _ => ErrorCategory::Storage,
        }
    }
}

impl HarvesterErrorTrait for ExtractError {
    fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            ExtractError::AuthenticationRequired
            | ExtractError::MissingCredentials
            | ExtractError::AuthenticationFailed(_)
            | ExtractError::Forbidden(_) => ErrorCategory::Auth,
            ExtractError::Decode(_) => ErrorCategory::Parsing,
            _ => ErrorCategory::Network,
        }
    }
}

/// Unified error type for the harvester crate
#[derive(Error, Debug)]
pub enum Error {
    /// Backlog store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Extraction errors
    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Worker loop errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HarvesterErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Extract(e) => HarvesterErrorTrait::is_recoverable(e),
            Self::Worker(WorkerError::Store(e)) => e.is_recoverable(),
            Self::Worker(WorkerError::Extract(e)) => HarvesterErrorTrait::is_recoverable(e),
            Self::Worker(WorkerError::Throttle(_)) => true,
            Self::Config(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) | Self::Worker(WorkerError::Store(e)) => e.category(),
            Self::Extract(e) | Self::Worker(WorkerError::Extract(e)) => e.category(),
            Self::Worker(WorkerError::Throttle(_)) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
