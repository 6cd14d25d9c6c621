use std::time::Duration;

/// High-level classification of a failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The call outlived its per-call deadline.
    Timeout,
    /// The service asked us to slow down.
    RateLimited,
    /// Any other failure expected to clear on its own.
    Transient,
    /// Malformed input or validation failure.
    Permanent,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }

    /// Stable code stored in the job's `error_code` column.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
        }
    }
}

/// Decision returned by the backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff for rate-limit signals: `min(scale * base^attempt, cap)`.
///
/// With the defaults (base 2, scale 1s, cap 30s) five consecutive signals wait
/// 2, 4, 8, 16 and 30 seconds.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: f64,
    pub cap: Duration,
    /// Unit of the exponential term; one second in production.
    pub scale: Duration,
    /// Rate-limit signals tolerated for one unit before it fails.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: 2.0,
            cap: Duration::from_secs(30),
            scale: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the `attempt`-th consecutive signal (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.max(1.0).powi(attempt.min(64) as i32);
        let raw = self.scale.as_secs_f64() * exp;
        if !raw.is_finite() || raw >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(raw)
    }

    /// Decide what to do after the `attempt`-th failure of kind `kind`.
    ///
    /// Only rate limits are retried in place; other transient kinds fail the
    /// unit and are retried at job level by the tracker. A server
    /// `retry_after` hint wins when it is longer than the computed delay.
    pub fn decide(&self, attempt: u32, kind: ErrorKind, hint: Option<Duration>) -> RetryDecision {
        if kind != ErrorKind::RateLimited || attempt > self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let delay = self.delay(attempt);
        let delay = match hint {
            Some(h) if h > delay => h.min(self.cap),
            _ => delay,
        };
        RetryDecision::RetryAfter(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_signals_follow_two_four_eight_sixteen_thirty() {
        let p = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|a| p.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30]);
    }

    #[test]
    fn huge_attempt_is_capped() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(1_000), p.cap);
    }

    #[test]
    fn only_rate_limits_retry_in_place() {
        let p = BackoffPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Transient, None), RetryDecision::NoRetry);
        assert_eq!(p.decide(1, ErrorKind::Timeout, None), RetryDecision::NoRetry);
        assert_eq!(
            p.decide(1, ErrorKind::RateLimited, None),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn respects_max_attempts_and_hint() {
        let p = BackoffPolicy {
            max_attempts: 2,
            ..BackoffPolicy::default()
        };
        assert_eq!(
            p.decide(2, ErrorKind::RateLimited, Some(Duration::from_secs(10))),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(p.decide(3, ErrorKind::RateLimited, None), RetryDecision::NoRetry);
    }
}
