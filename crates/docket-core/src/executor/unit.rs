//! One work unit: governor slot, bounded call, rate-limit backoff.

use std::sync::Arc;

use super::control::CancelToken;
use super::service::ExternalService;
use super::ExecutorSettings;
use crate::governor::Governor;
use crate::retry::{classify, ErrorKind, RetryDecision, ServiceError};
use crate::tracker::{BackoffNote, Job, ProgressPatch, StageFailure, StageName, Tracker};

pub(super) enum UnitError {
    Cancelled,
    Failed(StageFailure),
}

/// Everything a unit task needs; shared by all units of one stage run.
pub(super) struct UnitContext {
    pub(super) tracker: Tracker,
    pub(super) governor: Governor,
    pub(super) service: Arc<dyn ExternalService>,
    pub(super) settings: Arc<ExecutorSettings>,
    pub(super) cancel: CancelToken,
    pub(super) job: Job,
    pub(super) stage: StageName,
    pub(super) governor_name: Option<String>,
}

impl UnitContext {
    pub(super) async fn run(&self, unit: u64) -> Result<(), UnitError> {
        let job_id = self.job.id;
        let stage = self.stage;
        let mut rate_limited = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UnitError::Cancelled);
            }

            let slot = match &self.governor_name {
                Some(name) => {
                    let cfg = &self.settings.governor;
                    let acquired = tokio::select! {
                        r = self.governor.acquire(
                            name,
                            cfg.limit_for(name),
                            cfg.slot_ttl(),
                            cfg.acquire_timeout(),
                        ) => r,
                        _ = self.cancel.cancelled() => return Err(UnitError::Cancelled),
                    };
                    match acquired {
                        Ok(guard) => {
                            tracing::debug!(
                                job_id,
                                stage = %stage,
                                unit,
                                governor = %name,
                                slot = guard.token().unwrap_or("local"),
                                "governor slot acquired"
                            );
                            Some(guard)
                        }
                        Err(e) => {
                            return Err(UnitError::Failed(StageFailure::new(
                                ErrorKind::Timeout,
                                e.to_string(),
                            )))
                        }
                    }
                }
                None => None,
            };

            let timeout = self.settings.call_timeout;
            let outcome = tokio::select! {
                r = tokio::time::timeout(timeout, self.service.call(stage, &self.job, unit)) => Some(r),
                _ = self.cancel.cancelled() => None,
            };
            if let Some(slot) = slot {
                slot.release().await;
            }

            let err = match outcome {
                None => return Err(UnitError::Cancelled),
                Some(Err(_)) => {
                    return Err(UnitError::Failed(StageFailure::new(
                        ErrorKind::Timeout,
                        format!("unit {unit}: call timed out after {timeout:?}"),
                    )))
                }
                Some(Ok(Ok(()))) => {
                    if rate_limited > 0 {
                        if let Err(e) = self
                            .tracker
                            .save_partial_progress(job_id, &ProgressPatch::ClearBackoff)
                            .await
                        {
                            tracing::warn!(job_id, "could not clear backoff: {:#}", e);
                        }
                    }
                    return Ok(());
                }
                Some(Ok(Err(e))) => e,
            };

            let kind = classify(&err);
            let hint = match &err {
                ServiceError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            rate_limited += u32::from(kind == ErrorKind::RateLimited);
            let delay = match self.settings.backoff.decide(rate_limited, kind, hint) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::NoRetry => {
                    return Err(UnitError::Failed(StageFailure::new(
                        kind,
                        format!("unit {unit}: {err}"),
                    )))
                }
            };

            let note = BackoffNote {
                stage,
                unit,
                attempt: rate_limited,
                delay_secs: delay.as_secs_f64(),
                until: crate::tracker::db::unix_timestamp() + delay.as_secs_f64().ceil() as i64,
            };
            tracing::info!(
                job_id,
                stage = %stage,
                unit,
                attempt = rate_limited,
                delay_ms = delay.as_millis() as u64,
                "rate limited; backing off"
            );
            if let Err(e) = self
                .tracker
                .save_partial_progress(job_id, &ProgressPatch::Backoff(note))
                .await
            {
                tracing::warn!(job_id, "could not record backoff: {:#}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return Err(UnitError::Cancelled),
            }
        }
    }
}
