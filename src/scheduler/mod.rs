//! Worker pool scheduling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Supervisor                       │
//! │   release_all ─► spawn N workers ─► await outcomes   │
//! └───────┬───────────────────┬──────────────────┬───────┘
//!         │                   │                  │
//!         ▼                   ▼                  ▼
//!   ┌───────────┐       ┌───────────┐      ┌───────────┐
//!   │ worker-0  │       │ worker-1  │ ...  │LeaseReaper│
//!   │ (limiter) │       │ (limiter) │      │ (TTL, opt)│
//!   └─────┬─────┘       └─────┬─────┘      └─────┬─────┘
//!         └───────────────────┼──────────────────┘
//!                             ▼
//!                    ┌─────────────────┐
//!                    │ Shared backlog  │
//!                    └─────────────────┘
//! ```
//!
//! - [`supervisor`] - epoch lifecycle and outcome aggregation
//! - [`reaper`] - periodic reclamation of expired leases

pub mod reaper;
pub mod supervisor;

pub use reaper::{LeaseReaper, ReaperHandle};
pub use supervisor::{Supervisor, SupervisorReport, WorkerOutcome};
