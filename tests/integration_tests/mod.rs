//! Integration tests module
//!
//! This module provides end-to-end integration tests for the harvester,
//! including:
//! - Claim, release and lease-guarded writes
//! - Worker loop crash recovery
//! - Supervised pools draining a shared backlog
//! - Extraction over HTTP with re-authentication

pub mod fixtures;
pub mod lease_test;
pub mod pipeline_test;
pub mod supervisor_test;
pub mod worker_test;
