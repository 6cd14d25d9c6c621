//! Outcome of one call to an external recognition/AI service.

use std::time::Duration;

/// Error returned by a single external call.
///
/// Timeouts are not reported by services; the executor produces them when a
/// call outlives its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Structured rate-limit signal; `retry_after` is a server hint, if any.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    /// Generic transient failure (connection reset, 5xx, ...).
    #[error("transient: {0}")]
    Transient(String),
    /// Malformed input or validation failure; never retried.
    #[error("permanent: {0}")]
    Permanent(String),
}
