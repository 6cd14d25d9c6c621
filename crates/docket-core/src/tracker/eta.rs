//! Remaining-time estimate for a running job.

use std::time::Duration;

use super::types::{Job, JobStatus};

/// Estimate remaining time from the rate of the current attempt:
/// `elapsed * (100 - pct) / (pct - start_pct)`.
///
/// Progress carried over from an earlier attempt is not credited to this
/// one's clock. `None` while nothing is known (not started, no progress this
/// attempt, or waiting for a retry); zero once the job is terminal.
pub fn estimate(job: &Job, now: i64) -> Option<Duration> {
    if job.status.is_terminal() {
        return Some(Duration::ZERO);
    }
    if job.status != JobStatus::Processing {
        return None;
    }
    let started = job.started_at?;
    remaining(started, now, job.start_pct, job.progress_pct)
}

/// Pure form of [`estimate`] for an attempt started at `started` with
/// `start_pct` already done, now at `pct`.
pub fn remaining(started: i64, now: i64, start_pct: u8, pct: u8) -> Option<Duration> {
    if pct >= 100 {
        return Some(Duration::ZERO);
    }
    if pct <= start_pct {
        return None;
    }
    let elapsed = (now - started).max(0) as f64;
    let secs = elapsed * f64::from(100 - pct) / f64::from(pct - start_pct);
    Some(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_done_after_a_minute_needs_a_minute() {
        assert_eq!(remaining(1_000, 1_060, 0, 50), Some(Duration::from_secs(60)));
    }

    #[test]
    fn quarter_done_needs_three_times_elapsed() {
        assert_eq!(remaining(0, 100, 0, 25), Some(Duration::from_secs(300)));
    }

    #[test]
    fn requeued_attempt_counts_only_its_own_progress() {
        // Resumed at 50%, reached 60% in 10s: 40 points left at 1 point/s.
        assert_eq!(remaining(1_000, 1_010, 50, 60), Some(Duration::from_secs(40)));
        assert_eq!(remaining(1_000, 1_010, 50, 50), None);
    }

    #[test]
    fn unknown_without_progress() {
        assert_eq!(remaining(0, 100, 0, 0), None);
        assert_eq!(remaining(0, 100, 0, 100), Some(Duration::ZERO));
    }

    #[test]
    fn clock_skew_does_not_go_negative() {
        assert_eq!(remaining(200, 100, 0, 50), Some(Duration::ZERO));
    }
}
