//! Job read operations: get, list, stats, ETA.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::time::Duration;

use crate::tracker::db::{unix_millis, unix_timestamp, Tracker};
use crate::tracker::eta;
use crate::tracker::progress::JobProgress;
use crate::tracker::types::{Job, JobId, JobStatus, JobType, QueueStats, StageName};
use crate::tracker::TrackerError;

pub(crate) const JOB_COLUMNS: &str = r#"
    id, matter_id, document_id, job_type, status, current_stage,
    total_stages, completed_stages, progress_pct, retry_count, max_retries,
    error_code, error_message, page_count, metadata_json, revision,
    queued_at, started_at, start_pct, completed_at, updated_at,
    not_before_ms, claimed_by, lease_expires_ms
"#;

pub(crate) fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status: String = row.get("status");
    let job_type: String = row.get("job_type");
    let current_stage: Option<String> = row.get("current_stage");
    let metadata_json: String = row.get("metadata_json");
    let metadata: JobProgress = if metadata_json.trim().is_empty() {
        JobProgress::default()
    } else {
        serde_json::from_str(&metadata_json)
            .map_err(|e| TrackerError::Corrupt(format!("job metadata: {e}")))?
    };
    let progress_pct: i64 = row.get("progress_pct");

    Ok(Job {
        id: row.get("id"),
        matter_id: row.get("matter_id"),
        document_id: row.get("document_id"),
        job_type: JobType::parse(&job_type)?,
        status: JobStatus::parse(&status)?,
        current_stage: current_stage
            .as_deref()
            .map(StageName::parse)
            .transpose()?,
        total_stages: row.get::<i64, _>("total_stages") as u32,
        completed_stages: row.get::<i64, _>("completed_stages") as u32,
        progress_pct: progress_pct.clamp(0, 100) as u8,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        page_count: row.get::<i64, _>("page_count") as u32,
        metadata,
        revision: row.get("revision"),
        queued_at: row.get("queued_at"),
        started_at: row.get("started_at"),
        start_pct: row.get::<i64, _>("start_pct").clamp(0, 100) as u8,
        completed_at: row.get("completed_at"),
        updated_at: row.get("updated_at"),
        not_before_ms: row.get("not_before_ms"),
        claimed_by: row.get("claimed_by"),
        lease_expires_ms: row.get("lease_expires_ms"),
    })
}

impl Tracker {
    /// Fetch a single job, or `None` if it does not exist.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Fetch a job that must exist.
    pub(crate) async fn require_job(&self, id: JobId) -> Result<Job> {
        self.get_job(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(id).into())
    }

    /// All jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY queued_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Jobs belonging to one matter, newest first.
    pub async fn list_jobs_by_matter(&self, matter_id: &str) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE matter_id = ?1 ORDER BY queued_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(matter_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Jobs written at or after `since` (Unix seconds), oldest write first.
    pub async fn list_jobs_updated_since(&self, since: i64) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE updated_at >= ?1 ORDER BY updated_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Counts by status plus retry and queue-age figures.
    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n, SUM(retry_count) AS retries, MIN(queued_at) AS oldest
            FROM jobs
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n = row.get::<i64, _>("n") as u64;
            let retries: Option<i64> = row.get("retries");
            stats.total_retries += retries.unwrap_or(0) as u64;
            match JobStatus::parse(&status)? {
                JobStatus::Queued => {
                    stats.queued = n;
                    stats.oldest_queued_at = row.get("oldest");
                }
                JobStatus::Processing => stats.processing = n,
                JobStatus::Completed => stats.completed = n,
                JobStatus::Failed => stats.failed = n,
                JobStatus::Skipped => stats.skipped = n,
                JobStatus::Cancelled => stats.cancelled = n,
            }
        }
        Ok(stats)
    }

    /// Time until the earliest queued job may be claimed: zero when one is
    /// claimable now, `None` when nothing is queued.
    pub async fn next_claimable_in(&self) -> Result<Option<Duration>> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n, MIN(COALESCE(not_before_ms, 0)) AS earliest
            FROM jobs
            WHERE status = 'queued'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        if row.get::<i64, _>("n") == 0 {
            return Ok(None);
        }
        let earliest: Option<i64> = row.get("earliest");
        let wait = (earliest.unwrap_or(0) - unix_millis()).max(0);
        Ok(Some(Duration::from_millis(wait as u64)))
    }

    /// Whether `job` is processing under a claim made through this handle.
    pub fn holds(&self, job: &Job) -> bool {
        job.status == JobStatus::Processing && job.claimed_by.as_deref() == Some(self.worker_id())
    }

    /// Estimated time remaining for a job, from its start time and progress.
    pub async fn compute_eta(&self, id: JobId) -> Result<Option<Duration>> {
        let job = self.require_job(id).await?;
        Ok(eta::estimate(&job, unix_timestamp()))
    }
}
