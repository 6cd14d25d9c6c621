use serde::Serialize;

use crate::tracker::{eta, BackoffNote, Job, JobEventKind, JobId, JobStatus, StageName};

/// Channel carrying progress of every job of a matter.
pub fn matter_channel(matter_id: &str) -> String {
    format!("matter:{matter_id}:progress")
}

/// Full snapshot of a job's progress as seen by subscribers.
///
/// Each message stands alone, so a consumer that missed some only needs the
/// latest one (highest `revision`) per job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressMessage {
    pub job_id: JobId,
    pub matter_id: String,
    pub document_id: String,
    pub status: JobStatus,
    pub current_stage: Option<StageName>,
    pub completed_stages: u32,
    pub total_stages: u32,
    pub progress_pct: u8,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub backoff: Option<BackoffNote>,
    pub eta_secs: Option<u64>,
    pub revision: i64,
    pub updated_at: i64,
    /// What triggered the message; `None` for a resync snapshot.
    pub event: Option<JobEventKind>,
}

impl ProgressMessage {
    pub fn from_job(job: &Job, event: Option<JobEventKind>, now: i64) -> Self {
        Self {
            job_id: job.id,
            matter_id: job.matter_id.clone(),
            document_id: job.document_id.clone(),
            status: job.status,
            current_stage: job.current_stage,
            completed_stages: job.completed_stages,
            total_stages: job.total_stages,
            progress_pct: job.progress_pct,
            retry_count: job.retry_count,
            error_message: job.error_message.clone(),
            backoff: job.metadata.backoff.clone(),
            eta_secs: eta::estimate(job, now).map(|d| d.as_secs()),
            revision: job.revision,
            updated_at: job.updated_at,
            event,
        }
    }

    pub fn channel(&self) -> String {
        matter_channel(&self.matter_id)
    }
}
