//! Error classification and rate-limit backoff.
//!
//! External services answer with a [`ServiceError`]; [`classify`] maps it to an
//! [`ErrorKind`] so the executor and tracker agree on what is transient.
//! [`BackoffPolicy`] computes `min(base^attempt, cap)` delays for rate limits.

mod classify;
mod error;
mod policy;

pub use classify::classify;
pub use error::ServiceError;
pub use policy::{BackoffPolicy, ErrorKind, RetryDecision};
