//! Job/stage tracker (SQLite via sqlx).
//!
//! Authoritative state machine and progress ledger for document jobs:
//! job rows with their status, stage and partial-progress metadata, an
//! append-only stage history, and the recognized boxes and chunks of each
//! document. Every write that changes what an observer would see is published
//! as a [`JobEvent`] on an in-process broadcast channel.

pub mod db;
mod documents;
pub mod eta;
mod jobs;
pub mod progress;
mod stages;
pub mod types;
pub mod units;

pub use db::Tracker;
pub use progress::{BackoffNote, JobProgress, LinkSummary, ProgressPatch};
pub use types::*;
pub use units::UnitSet;

/// Tracker errors callers may want to match on (via `anyhow::Error::downcast_ref`).
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {job_id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {0}: concurrent update did not settle")]
    Contended(JobId),
    #[error("corrupt tracker row: {0}")]
    Corrupt(String),
}
