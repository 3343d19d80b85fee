//! Backlog processing with per-worker rate limiting
//!
//! This module implements the worker side of the harvester: the jittered
//! rate limiter, authenticated sessions, the detail extractor and the
//! claim/process/release worker loop.

pub mod fetcher;
pub mod instance;
pub mod mock;
pub mod session;
pub mod throttle;
pub mod worker;

pub use fetcher::{Extractor, HttpExtractor};
pub use instance::{WorkerSettings, WorkerSettingsBuilder};
pub use session::{CredentialSession, HttpSessionFactory, Session, SessionFactory};
pub use throttle::RateLimiter;
pub use worker::{ItemOutcome, WorkerLoop, WorkerReport, WorkerState};
