//! Stage history: one append-only record per stage attempt.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_millis, unix_timestamp, Tracker};
use crate::retry::BackoffPolicy;
use super::progress::stage_progress_pct;
use super::types::{JobId, JobStatus, StageFailure, StageName, StageRecord, StageStatus};
use super::TrackerError;

fn record_from_row(row: &SqliteRow) -> Result<StageRecord> {
    let stage: String = row.get("stage");
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| TrackerError::Corrupt(format!("stage metadata: {e}")))?;
    Ok(StageRecord {
        id: row.get("id"),
        job_id: row.get("job_id"),
        stage: StageName::parse(&stage)?,
        attempt: row.get::<i64, _>("attempt") as u32,
        status: StageStatus::parse(&status)?,
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        error_message: row.get("error_message"),
        metadata,
    })
}

impl Tracker {
    async fn append_stage_record(
        &self,
        job_id: JobId,
        stage: StageName,
        status: StageStatus,
        ended: bool,
        metadata: &serde_json::Value,
    ) -> Result<StageRecord> {
        let now = unix_timestamp();
        let attempt: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM stage_records
            WHERE job_id = ?1 AND stage = ?2 AND status != 'skipped'
            "#,
        )
        .bind(job_id)
        .bind(stage.as_str())
        .fetch_one(&self.pool)
        .await?
        .get("n");
        let attempt = if status == StageStatus::Skipped {
            attempt
        } else {
            attempt + 1
        };

        let id = sqlx::query(
            r#"
            INSERT INTO stage_records (
                job_id, stage, attempt, status, started_at, ended_at, error_message, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)
            "#,
        )
        .bind(job_id)
        .bind(stage.as_str())
        .bind(attempt)
        .bind(status.as_str())
        .bind(now)
        .bind(ended.then_some(now))
        .bind(serde_json::to_string(metadata)?)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(StageRecord {
            id,
            job_id,
            stage,
            attempt: attempt as u32,
            status,
            started_at: now,
            ended_at: ended.then_some(now),
            error_message: None,
            metadata: metadata.clone(),
        })
    }

    /// Close the open attempt of `stage`, if any. Returns whether a record was closed.
    async fn close_stage_record(
        &self,
        job_id: JobId,
        stage: StageName,
        status: StageStatus,
        error_message: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;
        let updated = sqlx::query(
            r#"
            UPDATE stage_records
            SET status = ?1,
                ended_at = ?2,
                error_message = ?3,
                metadata_json = COALESCE(?4, metadata_json)
            WHERE id = (
                SELECT id FROM stage_records
                WHERE job_id = ?5 AND stage = ?6 AND status = 'in_progress'
                ORDER BY id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(status.as_str())
        .bind(unix_timestamp())
        .bind(error_message)
        .bind(metadata_json)
        .bind(job_id)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Close every open attempt of a job as failed (worker crash, cancellation).
    pub(crate) async fn close_open_stage_records(&self, job_id: JobId, reason: &str) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE stage_records
            SET status = 'failed', ended_at = ?1, error_message = ?2
            WHERE job_id = ?3 AND status = 'in_progress'
            "#,
        )
        .bind(unix_timestamp())
        .bind(reason)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Open a new attempt of `stage` and make it the job's current stage.
    pub async fn record_stage_start(&self, job_id: JobId, stage: StageName) -> Result<StageRecord> {
        let record = self
            .append_stage_record(
                job_id,
                stage,
                StageStatus::InProgress,
                false,
                &serde_json::json!({}),
            )
            .await?;
        self.modify(job_id, |job, _| {
            job.current_stage = Some(stage);
            Ok(())
        })
        .await?;
        tracing::debug!(job_id, stage = %stage, attempt = record.attempt, "stage started");
        Ok(record)
    }

    /// Close the current attempt as completed and count the stage as done.
    pub async fn record_stage_complete(
        &self,
        job_id: JobId,
        stage: StageName,
        metadata: serde_json::Value,
    ) -> Result<()> {
        self.close_stage_record(job_id, stage, StageStatus::Completed, None, Some(&metadata))
            .await?;
        self.modify(job_id, |job, _| {
            job.metadata.mark_stage_complete(stage);
            job.metadata.backoff = None;
            job.completed_stages = (job.metadata.completed_stages.len() as u32).min(job.total_stages);
            let pct = stage_progress_pct(job.completed_stages, job.total_stages, 0.0);
            job.raise_progress(pct);
            Ok(())
        })
        .await?;
        tracing::debug!(job_id, stage = %stage, "stage completed");
        Ok(())
    }

    /// Append a skipped record, e.g. for a stage finished by an earlier attempt.
    pub async fn record_stage_skipped(&self, job_id: JobId, stage: StageName, reason: &str) -> Result<()> {
        self.append_stage_record(
            job_id,
            stage,
            StageStatus::Skipped,
            true,
            &serde_json::json!({ "reason": reason }),
        )
        .await?;
        Ok(())
    }

    /// Record a stage failure and apply the retry rule.
    ///
    /// The job moves `processing -> failed` and `retry_count` is incremented.
    /// A transient failure with `retry_count < max_retries` is requeued, not
    /// claimable until `retry_backoff.delay(retry_count)` has passed; anything
    /// else leaves the job `failed` until an operator retries or skips it. A
    /// job cancelled meanwhile stays cancelled. Returns the final status.
    pub async fn record_stage_failure(
        &self,
        job_id: JobId,
        stage: StageName,
        failure: &StageFailure,
        retry_backoff: &BackoffPolicy,
    ) -> Result<JobStatus> {
        self.close_stage_record(job_id, stage, StageStatus::Failed, Some(&failure.message), None)
            .await?;

        let current = self.require_job(job_id).await?;
        if current.status == JobStatus::Cancelled {
            return Ok(JobStatus::Cancelled);
        }

        let failed = self
            .modify(job_id, |job, now| {
                job.transition(JobStatus::Failed, now)?;
                job.retry_count += 1;
                job.error_code = Some(failure.kind.code().to_string());
                job.error_message = Some(format!("{}: {}", stage, failure.message));
                Ok(())
            })
            .await?;

        let retry = failure.kind.is_transient() && failed.retry_count < failed.max_retries;
        tracing::warn!(
            job_id,
            stage = %stage,
            retry_count = failed.retry_count,
            max_retries = failed.max_retries,
            requeue = retry,
            "stage failed: {}",
            failure.message
        );
        if !retry {
            return Ok(JobStatus::Failed);
        }
        let delay = retry_backoff.delay(failed.retry_count);
        let queued = self
            .modify(job_id, |job, now| {
                job.transition(JobStatus::Queued, now)?;
                job.not_before_ms = Some(unix_millis() + delay.as_millis() as i64);
                Ok(())
            })
            .await?;
        tracing::info!(
            job_id,
            delay_ms = delay.as_millis() as u64,
            "job requeued after transient failure"
        );
        Ok(queued.status)
    }

    /// Every attempt of every stage of a job, oldest first.
    pub async fn get_stage_history(&self, job_id: JobId) -> Result<Vec<StageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, stage, attempt, status, started_at, ended_at, error_message, metadata_json
            FROM stage_records
            WHERE job_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}
