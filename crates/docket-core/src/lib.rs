//! Docket core: orchestration of long-running document-processing jobs.
//!
//! - [`tracker`]: job state machine, stage history and partial progress in SQLite.
//! - [`governor`]: cross-process bound on in-flight external calls.
//! - [`linker`]: bounded fuzzy linking of recognized boxes to text chunks.
//! - [`broadcast`]: per-matter progress fan-out.
//! - [`executor`]: runs jobs through the stage pipeline.

pub mod broadcast;
pub mod config;
pub mod executor;
pub mod governor;
pub mod linker;
pub mod logging;
pub mod retry;
pub mod tracker;
