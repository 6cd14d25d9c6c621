//! Job write operations: create, transition, claim, progress, operator actions.

use anyhow::Result;

use super::lifecycle::event_kind;
use super::read::{job_from_row, JOB_COLUMNS};
use crate::tracker::db::{unix_millis, unix_timestamp, Tracker};
use crate::tracker::progress::{stage_progress_pct, JobProgress, ProgressPatch};
use crate::tracker::types::{Job, JobEventKind, JobId, JobStatus, NewJob, StageName};
use crate::tracker::TrackerError;

/// Attempts of the optimistic read-modify-write loop before giving up.
const MAX_WRITE_ATTEMPTS: usize = 8;

impl Tracker {
    /// Insert a new queued job.
    pub async fn create_job(&self, new: &NewJob) -> Result<JobId> {
        let now = unix_timestamp();
        let metadata_json = serde_json::to_string(&JobProgress::default())?;
        let id = sqlx::query(
            r#"
            INSERT INTO jobs (
                matter_id, document_id, job_type, status, current_stage,
                total_stages, completed_stages, progress_pct, retry_count, max_retries,
                error_code, error_message, page_count, metadata_json, revision,
                queued_at, started_at, completed_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, NULL,
                      ?5, 0, 0, 0, ?6,
                      NULL, NULL, ?7, ?8, 0,
                      ?9, NULL, NULL, ?9)
            "#,
        )
        .bind(&new.matter_id)
        .bind(&new.document_id)
        .bind(new.job_type.as_str())
        .bind(JobStatus::Queued.as_str())
        .bind(new.total_stages as i64)
        .bind(new.max_retries as i64)
        .bind(new.page_count as i64)
        .bind(metadata_json)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let job = self.require_job(id).await?;
        tracing::debug!(job_id = id, matter = %new.matter_id, "job created");
        self.emit(JobEventKind::Created, &job);
        Ok(id)
    }

    /// Read-modify-write of one job row, guarded by its revision so writes from
    /// another process are never silently overwritten.
    ///
    /// The claim columns are owned by the claim, renewal and recovery queries;
    /// here they are only cleared once the job leaves `processing`.
    pub(crate) async fn modify<F>(&self, id: JobId, mut f: F) -> Result<Job>
    where
        F: FnMut(&mut Job, i64) -> Result<()>,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.require_job(id).await?;
            let now = unix_timestamp();
            let mut next = current.clone();
            f(&mut next, now)?;
            if next == current {
                return Ok(current);
            }
            next.revision = current.revision + 1;
            next.updated_at = now;

            let metadata_json = serde_json::to_string(&next.metadata)?;
            let updated = sqlx::query(
                r#"
                UPDATE jobs
                SET status = ?1,
                    current_stage = ?2,
                    completed_stages = ?3,
                    progress_pct = ?4,
                    retry_count = ?5,
                    error_code = ?6,
                    error_message = ?7,
                    metadata_json = ?8,
                    revision = ?9,
                    started_at = ?10,
                    start_pct = ?11,
                    completed_at = ?12,
                    updated_at = ?13,
                    not_before_ms = ?14,
                    claimed_by = CASE WHEN ?1 = 'processing' THEN claimed_by END,
                    lease_expires_ms = CASE WHEN ?1 = 'processing' THEN lease_expires_ms END
                WHERE id = ?15 AND revision = ?16
                "#,
            )
            .bind(next.status.as_str())
            .bind(next.current_stage.map(StageName::as_str))
            .bind(next.completed_stages as i64)
            .bind(next.progress_pct as i64)
            .bind(next.retry_count as i64)
            .bind(&next.error_code)
            .bind(&next.error_message)
            .bind(metadata_json)
            .bind(next.revision)
            .bind(next.started_at)
            .bind(next.start_pct as i64)
            .bind(next.completed_at)
            .bind(next.updated_at)
            .bind(next.not_before_ms)
            .bind(id)
            .bind(current.revision)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 1 {
                if next.status != JobStatus::Processing {
                    next.claimed_by = None;
                    next.lease_expires_ms = None;
                }
                self.emit(event_kind(&current, &next), &next);
                return Ok(next);
            }
            tracing::debug!(job_id = id, "job revision moved underneath write; retrying");
        }
        Err(TrackerError::Contended(id).into())
    }

    /// Move a job along one edge of the state machine.
    ///
    /// Fails with [`TrackerError::IllegalTransition`] for any edge outside the graph.
    pub async fn transition_status(&self, id: JobId, to: JobStatus) -> Result<Job> {
        let job = self
            .modify(id, |job, now| Ok(job.transition(to, now)?))
            .await?;
        tracing::info!(job_id = id, status = %to, "job status changed");
        Ok(job)
    }

    /// Atomically claim the oldest claimable queued job by moving it to
    /// `processing` under a lease held by this handle's worker id.
    /// Safe across worker processes: the claim is a single conditional UPDATE.
    /// Jobs waiting out a requeue delay are passed over.
    pub async fn claim_next_queued_job(&self) -> Result<Option<Job>> {
        let now = unix_timestamp();
        let now_ms = unix_millis();
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing',
                started_at = ?1,
                start_pct = progress_pct,
                not_before_ms = NULL,
                claimed_by = ?3,
                lease_expires_ms = ?2 + ?4,
                revision = revision + 1,
                updated_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued'
                  AND (not_before_ms IS NULL OR not_before_ms <= ?2)
                ORDER BY queued_at ASC, id ASC
                LIMIT 1
            ) AND status = 'queued'
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(now_ms)
        .bind(self.worker_id())
        .bind(self.lease().as_millis() as i64)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = sqlx::Row::get(&row, "id");
        let job = self.require_job(id).await?;
        self.emit(
            JobEventKind::StatusChanged {
                from: JobStatus::Queued,
                to: JobStatus::Processing,
            },
            &job,
        );
        tracing::debug!(job_id = id, worker = %self.worker_id(), "claimed queued job");
        Ok(Some(job))
    }

    /// Extend the lease on a job this handle claimed. `false` when the job is
    /// no longer processing under this worker (recovered, cancelled, finished).
    pub async fn renew_lease(&self, id: JobId) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_ms = ?1
            WHERE id = ?2 AND status = 'processing' AND claimed_by = ?3
            "#,
        )
        .bind(unix_millis() + self.lease().as_millis() as i64)
        .bind(id)
        .bind(self.worker_id())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    /// Requeue `processing` jobs whose lease lapsed, i.e. whose worker died or
    /// stalled. Jobs of live workers are left alone.
    ///
    /// Each job is first taken over with a conditional UPDATE, so a renewal
    /// racing the recovery makes one side lose cleanly. It then goes through
    /// `failed` so observers only ever see legal edges. Returns the number requeued.
    pub async fn recover_processing_jobs(&self) -> Result<u64> {
        let now_ms = unix_millis();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'processing' \
             AND (lease_expires_ms IS NULL OR lease_expires_ms <= ?1)"
        );
        let rows = sqlx::query(&sql).bind(now_ms).fetch_all(&self.pool).await?;
        let mut recovered = 0;
        for row in rows {
            let job = job_from_row(&row)?;
            let taken = sqlx::query(
                r#"
                UPDATE jobs
                SET claimed_by = ?1, lease_expires_ms = ?2, revision = revision + 1
                WHERE id = ?3 AND status = 'processing'
                  AND (lease_expires_ms IS NULL OR lease_expires_ms <= ?4)
                "#,
            )
            .bind(self.worker_id())
            .bind(now_ms + self.lease().as_millis() as i64)
            .bind(job.id)
            .bind(now_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();
            if taken == 0 {
                tracing::debug!(job_id = job.id, "lease renewed before recovery; leaving job");
                continue;
            }

            self.close_open_stage_records(job.id, "worker lost").await?;
            self.modify(job.id, |j, now| {
                j.transition(JobStatus::Failed, now)?;
                j.error_code = Some("worker_lost".to_string());
                j.error_message = Some("worker stopped while processing".to_string());
                Ok(())
            })
            .await?;
            match self.transition_status(job.id, JobStatus::Queued).await {
                Ok(_) => {
                    tracing::info!(
                        job_id = job.id,
                        previous_worker = job.claimed_by.as_deref().unwrap_or("unknown"),
                        "requeued job whose lease lapsed"
                    );
                    recovered += 1;
                }
                // Cancelled in between: nothing to requeue.
                Err(e) if e.downcast_ref::<TrackerError>().is_some() => {
                    tracing::warn!(job_id = job.id, "could not requeue recovered job: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }

    /// Merge a partial-progress patch into the job's metadata.
    ///
    /// Completed units only ever accumulate; stage fractions only raise
    /// `progress_pct` (never to 100).
    pub async fn save_partial_progress(&self, id: JobId, patch: &ProgressPatch) -> Result<Job> {
        self.modify(id, |job, _| {
            job.metadata.apply(patch);
            if let ProgressPatch::StageFraction { fraction, .. } = patch {
                let pct = stage_progress_pct(job.completed_stages, job.total_stages, *fraction);
                job.raise_progress(pct);
            }
            Ok(())
        })
        .await
    }

    /// Operator retry: `failed -> queued` with the retry budget restored.
    /// Partial progress is kept, so the rerun skips finished work.
    pub async fn retry_job(&self, id: JobId) -> Result<Job> {
        let job = self
            .modify(id, |job, now| {
                job.transition(JobStatus::Queued, now)?;
                job.retry_count = 0;
                job.not_before_ms = None;
                job.error_code = None;
                job.error_message = None;
                Ok(())
            })
            .await?;
        tracing::info!(job_id = id, "job manually retried");
        Ok(job)
    }

    /// Operator gives up on a failed job: `failed -> skipped`.
    pub async fn skip_job(&self, id: JobId) -> Result<Job> {
        self.transition_status(id, JobStatus::Skipped).await
    }

    /// Cancel a job in any non-terminal state. Persisted progress is kept.
    pub async fn cancel_job(&self, id: JobId) -> Result<Job> {
        self.transition_status(id, JobStatus::Cancelled).await
    }
}
