//! In-memory state changes applied to a job before it is written back.

use crate::tracker::progress::stage_progress_pct;
use crate::tracker::types::{Job, JobEventKind, JobStatus};
use crate::tracker::TrackerError;

impl Job {
    /// Move to `to`, enforcing the transition graph and stamping the fields
    /// each target state owns.
    pub(crate) fn transition(&mut self, to: JobStatus, now: i64) -> Result<(), TrackerError> {
        if !self.status.can_transition_to(to) {
            return Err(TrackerError::IllegalTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        match to {
            JobStatus::Processing => {
                self.started_at = Some(now);
                self.start_pct = self.progress_pct;
                self.not_before_ms = None;
            }
            JobStatus::Completed => {
                self.completed_stages = self.total_stages;
                self.progress_pct = 100;
                self.error_code = None;
                self.error_message = None;
                self.metadata.backoff = None;
            }
            JobStatus::Queued => {
                // Requeue from failure: drop the in-stage fraction, keep finished stages.
                self.progress_pct = self.baseline_pct();
                self.metadata.backoff = None;
            }
            JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled => {
                self.metadata.backoff = None;
            }
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = to;
        Ok(())
    }

    /// Progress implied by finished stages alone.
    pub(crate) fn baseline_pct(&self) -> u8 {
        stage_progress_pct(self.completed_stages, self.total_stages, 0.0)
    }

    /// Raise progress to `pct` (capped at 99). Progress never moves backwards here.
    pub(crate) fn raise_progress(&mut self, pct: u8) {
        let pct = pct.min(99);
        if pct > self.progress_pct {
            self.progress_pct = pct;
        }
    }
}

/// Most significant change between two versions of a job.
pub(crate) fn event_kind(before: &Job, after: &Job) -> JobEventKind {
    if before.status != after.status {
        JobEventKind::StatusChanged {
            from: before.status,
            to: after.status,
        }
    } else if before.current_stage != after.current_stage {
        match after.current_stage {
            Some(stage) => JobEventKind::StageChanged { stage },
            None => JobEventKind::Progress,
        }
    } else {
        JobEventKind::Progress
    }
}
