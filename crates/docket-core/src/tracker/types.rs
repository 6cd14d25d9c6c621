//! Types stored by the job tracker.

use serde::{Deserialize, Serialize};

use super::progress::JobProgress;
use super::TrackerError;
use crate::retry::ErrorKind;

/// Job identifier.
pub type JobId = i64;

/// Lifecycle status of a job, stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Skipped,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TrackerError> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| TrackerError::Corrupt(format!("unknown job status {s:?}")))
    }

    /// `completed`, `skipped` and `cancelled` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }

    /// The only legal edges of the job state machine.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Queued, Processing) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            (Failed, Queued) | (Failed, Skipped) => true,
            (Queued | Processing | Failed, Cancelled) => true,
            _ => false,
        }
    }
}

/// Kind of job; both run the same pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Ingest,
    Reprocess,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Ingest => "ingest",
            JobType::Reprocess => "reprocess",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TrackerError> {
        match s {
            "ingest" => Ok(JobType::Ingest),
            "reprocess" => Ok(JobType::Reprocess),
            _ => Err(TrackerError::Corrupt(format!("unknown job type {s:?}"))),
        }
    }
}

/// Named pipeline step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Recognition,
    Validation,
    Chunking,
    Embedding,
    EntityExtraction,
    AliasResolution,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::Recognition,
        StageName::Validation,
        StageName::Chunking,
        StageName::Embedding,
        StageName::EntityExtraction,
        StageName::AliasResolution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Recognition => "recognition",
            StageName::Validation => "validation",
            StageName::Chunking => "chunking",
            StageName::Embedding => "embedding",
            StageName::EntityExtraction => "entity_extraction",
            StageName::AliasResolution => "alias_resolution",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TrackerError> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| TrackerError::Corrupt(format!("unknown stage {s:?}")))
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of one attempt at one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TrackerError> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "in_progress" => Ok(StageStatus::InProgress),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            "skipped" => Ok(StageStatus::Skipped),
            _ => Err(TrackerError::Corrupt(format!("unknown stage status {s:?}"))),
        }
    }
}

/// Parameters for `Tracker::create_job`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub matter_id: String,
    pub document_id: String,
    pub job_type: JobType,
    /// Number of scanned pages; recognition and validation run once per page.
    pub page_count: u32,
    pub max_retries: u32,
    /// Stages of the pipeline that will run the job; progress is weighted by it.
    pub total_stages: u32,
}

impl NewJob {
    pub fn ingest(matter_id: impl Into<String>, document_id: impl Into<String>, page_count: u32) -> Self {
        Self {
            matter_id: matter_id.into(),
            document_id: document_id.into(),
            job_type: JobType::Ingest,
            page_count,
            max_retries: 3,
            total_stages: StageName::ALL.len() as u32,
        }
    }

    pub fn with_total_stages(mut self, total_stages: usize) -> Self {
        self.total_stages = total_stages as u32;
        self
    }
}

/// Full job record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub matter_id: String,
    pub document_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub current_stage: Option<StageName>,
    pub total_stages: u32,
    pub completed_stages: u32,
    pub progress_pct: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub page_count: u32,
    pub metadata: JobProgress,
    /// Incremented on every write; consumers keep the highest revision they saw.
    pub revision: i64,
    pub queued_at: i64,
    /// Start of the current attempt (stamped on every claim).
    pub started_at: Option<i64>,
    /// `progress_pct` when the current attempt started; the ETA only counts progress made since.
    pub start_pct: u8,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
    /// A requeued job is not claimed before this Unix time in milliseconds.
    pub not_before_ms: Option<i64>,
    /// Worker holding the job while it is processing.
    pub claimed_by: Option<String>,
    /// The claim lapses at this Unix time in milliseconds unless renewed.
    pub lease_expires_ms: Option<i64>,
}

/// One attempt at one stage. Never updated after it is closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub id: i64,
    pub job_id: JobId,
    pub stage: StageName,
    /// 1-based attempt number for this stage of this job.
    pub attempt: u32,
    pub status: StageStatus,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

/// Why a stage failed, as reported by the executor.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Counts by status, for the `stats` query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    /// Sum of `retry_count` over all jobs.
    pub total_retries: u64,
    /// Enqueue time of the oldest job still waiting.
    pub oldest_queued_at: Option<i64>,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.completed + self.failed + self.skipped + self.cancelled
    }
}

/// What changed in a tracker write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum JobEventKind {
    Created,
    StatusChanged { from: JobStatus, to: JobStatus },
    StageChanged { stage: StageName },
    Progress,
}

/// Snapshot published after every tracker write.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
}
