//! Run one job through every stage of the pipeline.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

use super::control::CancelToken;
use super::pipeline::{StageMode, UnitSource};
use super::progress_writer::ProgressWriter;
use super::unit::{UnitContext, UnitError};
use super::Executor;
use crate::linker::{self, LinkProgress};
use crate::retry::ErrorKind;
use crate::tracker::{
    Job, JobId, JobStatus, LinkSummary, ProgressPatch, StageFailure, StageName, TrackerError,
};

enum StageOutcome {
    Completed(serde_json::Value),
    Failed(StageFailure),
    Cancelled,
}

fn is_illegal_transition(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<TrackerError>(),
        Some(TrackerError::IllegalTransition { .. })
    )
}

/// One failure for the whole stage: permanent if any unit failed permanently,
/// otherwise the kind of the first failed unit.
fn stage_failure(mut failures: Vec<(u64, StageFailure)>, total: u64) -> Option<StageFailure> {
    failures.sort_by_key(|(unit, _)| *unit);
    let (_, first) = failures.first()?;
    let kind = if failures.iter().any(|(_, f)| f.kind == ErrorKind::Permanent) {
        ErrorKind::Permanent
    } else {
        first.kind
    };
    Some(StageFailure::new(
        kind,
        format!("{} of {} units failed; {}", failures.len(), total, first.message),
    ))
}

impl Executor {
    /// Claim the oldest queued job and run it. `None` when the queue is empty.
    pub async fn run_next_job(&self) -> Result<Option<(JobId, JobStatus)>> {
        let Some(job) = self.tracker.claim_next_queued_job().await? else {
            return Ok(None);
        };
        let id = job.id;
        let status = self.run_job(job).await?;
        Ok(Some((id, status)))
    }

    /// Run a claimed (`processing`) job until it completes, fails, or is
    /// cancelled. Returns the job's status afterwards.
    pub async fn run_job(&self, job: Job) -> Result<JobStatus> {
        let job_id = job.id;
        let cancel = self.control.register(job_id);
        let heartbeat = self.spawn_heartbeat(job_id, cancel.clone());
        let result = self.drive(job, &cancel).await;
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        self.control.unregister(job_id);

        match result {
            Ok(status) => Ok(status),
            Err(e) => {
                // Store or runtime trouble, not a service verdict: fail the
                // stage as transient so the retry budget applies.
                tracing::error!(job_id, "job run failed: {:#}", e);
                let current = self
                    .tracker
                    .get_job(job_id)
                    .await?
                    .ok_or(TrackerError::NotFound(job_id))?;
                if !self.tracker.holds(&current) {
                    return Ok(current.status);
                }
                let stage = current
                    .current_stage
                    .or_else(|| self.pipeline.stages.first().map(|s| s.name))
                    .unwrap_or(StageName::Recognition);
                let failure = StageFailure::new(ErrorKind::Transient, format!("{e:#}"));
                self.tracker
                    .record_stage_failure(job_id, stage, &failure, &self.settings.job_retry)
                    .await
            }
        }
    }

    /// Keep the job's lease alive while it runs. A renewal that finds the job
    /// gone from this worker (recovered elsewhere, cancelled) stops the run.
    fn spawn_heartbeat(&self, job_id: JobId, cancel: CancelToken) -> Option<JoinHandle<()>> {
        let lease = self.tracker.lease();
        if lease.is_zero() {
            return None;
        }
        let tracker = self.tracker.clone();
        let period = (lease / 3).max(Duration::from_millis(1));
        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                match tracker.renew_lease(job_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id, "job no longer held by this worker; stopping");
                        cancel.cancel();
                        break;
                    }
                    Err(e) => tracing::warn!(job_id, "lease renewal failed: {:#}", e),
                }
            }
        }))
    }

    async fn drive(&self, job: Job, cancel: &CancelToken) -> Result<JobStatus> {
        let job_id = job.id;
        tracing::info!(
            job_id,
            matter = %job.matter_id,
            document = %job.document_id,
            retry_count = job.retry_count,
            "job started"
        );

        for spec in &self.pipeline.stages {
            let current = self
                .tracker
                .get_job(job_id)
                .await?
                .ok_or(TrackerError::NotFound(job_id))?;
            if !self.tracker.holds(&current) {
                tracing::info!(
                    job_id,
                    status = %current.status,
                    "job left processing or passed to another worker; stopping"
                );
                return Ok(current.status);
            }
            if cancel.is_cancelled() {
                return self.finish_cancelled(job_id).await;
            }
            if current.metadata.is_stage_complete(spec.name) {
                self.tracker
                    .record_stage_skipped(job_id, spec.name, "completed by an earlier attempt")
                    .await?;
                continue;
            }

            self.tracker.record_stage_start(job_id, spec.name).await?;
            let outcome = match &spec.mode {
                StageMode::Service { governor, units } => {
                    self.run_service_stage(&current, spec.name, governor.as_deref(), *units, cancel)
                        .await?
                }
                StageMode::Link => self.run_link_stage(&current, spec.name).await?,
            };
            match outcome {
                StageOutcome::Completed(metadata) => {
                    self.tracker
                        .record_stage_complete(job_id, spec.name, metadata)
                        .await?;
                }
                StageOutcome::Cancelled => return self.finish_cancelled(job_id).await,
                StageOutcome::Failed(failure) => {
                    return self
                        .tracker
                        .record_stage_failure(
                            job_id,
                            spec.name,
                            &failure,
                            &self.settings.job_retry,
                        )
                        .await;
                }
            }
        }

        if !self.still_processing(job_id).await? {
            let job = self
                .tracker
                .get_job(job_id)
                .await?
                .ok_or(TrackerError::NotFound(job_id))?;
            tracing::info!(job_id, status = %job.status, "job taken away before completion");
            return Ok(job.status);
        }

        match self.tracker.transition_status(job_id, JobStatus::Completed).await {
            Ok(job) => {
                tracing::info!(job_id, "job completed");
                Ok(job.status)
            }
            // Cancelled between the last stage and here.
            Err(e) if is_illegal_transition(&e) => {
                let job = self
                    .tracker
                    .get_job(job_id)
                    .await?
                    .ok_or(TrackerError::NotFound(job_id))?;
                Ok(job.status)
            }
            Err(e) => Err(e),
        }
    }

    /// Make sure a cancelled job is recorded as such and its open attempt closed.
    ///
    /// A job this worker no longer holds and that was not cancelled was
    /// recovered by another worker; it is left to that worker untouched.
    async fn finish_cancelled(&self, job_id: JobId) -> Result<JobStatus> {
        let current = self
            .tracker
            .get_job(job_id)
            .await?
            .ok_or(TrackerError::NotFound(job_id))?;
        if self.tracker.holds(&current) {
            match self.tracker.cancel_job(job_id).await {
                Ok(_) => {}
                Err(e) if is_illegal_transition(&e) => {}
                Err(e) => return Err(e),
            }
        } else if current.status != JobStatus::Cancelled {
            tracing::warn!(job_id, status = %current.status, "lost the job to another worker");
            return Ok(current.status);
        }
        self.tracker.close_open_stage_records(job_id, "cancelled").await?;
        let job = self
            .tracker
            .get_job(job_id)
            .await?
            .ok_or(TrackerError::NotFound(job_id))?;
        tracing::info!(job_id, status = %job.status, "job stopped by cancellation");
        Ok(job.status)
    }

    /// The job is still processing under this worker's claim.
    async fn still_processing(&self, job_id: JobId) -> Result<bool> {
        Ok(self
            .tracker
            .get_job(job_id)
            .await?
            .is_some_and(|j| self.tracker.holds(&j)))
    }

    async fn run_service_stage(
        &self,
        job: &Job,
        stage: StageName,
        governor: Option<&str>,
        source: UnitSource,
        cancel: &CancelToken,
    ) -> Result<StageOutcome> {
        let units: Vec<u64> = match source {
            UnitSource::Pages => (1..=u64::from(job.page_count)).collect(),
            UnitSource::Chunks => self
                .documents
                .load_chunks(&job.document_id)
                .await?
                .iter()
                .map(|c| u64::from(c.index))
                .collect(),
            UnitSource::Single => vec![0],
        };
        let total = units.len() as u64;
        let pending: Vec<u64> = match job.metadata.completed_units(stage) {
            Some(done) => units.into_iter().filter(|u| !done.contains(*u)).collect(),
            None => units,
        };
        let skipped = total - pending.len() as u64;
        if skipped > 0 {
            tracing::info!(
                job_id = job.id,
                stage = %stage,
                skipped,
                total,
                "resuming stage; skipping completed units"
            );
        }

        let writer = ProgressWriter::spawn(self.tracker.clone(), job.id, stage, total, skipped);
        let ctx = Arc::new(UnitContext {
            tracker: self.tracker.clone(),
            governor: self.governor.clone(),
            service: Arc::clone(&self.service),
            settings: Arc::clone(&self.settings),
            cancel: cancel.clone(),
            job: job.clone(),
            stage,
            governor_name: governor.map(str::to_string),
        });

        let parallelism = self.settings.unit_parallelism.max(1);
        let mut queue = pending.iter().copied();
        let mut set = JoinSet::new();
        let mut failures = Vec::new();
        let mut cancelled = false;

        loop {
            while !cancelled && set.len() < parallelism {
                let Some(unit) = queue.next() else {
                    break;
                };
                // Also honours a cancel issued by another process.
                if cancel.is_cancelled() || !self.still_processing(job.id).await? {
                    cancel.cancel();
                    cancelled = true;
                    break;
                }
                let ctx = Arc::clone(&ctx);
                set.spawn(async move { (unit, ctx.run(unit).await) });
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            let (unit, result) = joined.context("unit task join")?;
            match result {
                Ok(()) => writer.unit_done(unit).await,
                Err(UnitError::Cancelled) => cancelled = true,
                Err(UnitError::Failed(failure)) => {
                    tracing::warn!(
                        job_id = job.id,
                        stage = %stage,
                        unit,
                        kind = failure.kind.code(),
                        "unit failed: {}",
                        failure.message
                    );
                    failures.push((unit, failure));
                }
            }
        }
        writer.finish().await;

        if cancelled {
            return Ok(StageOutcome::Cancelled);
        }
        if let Some(failure) = stage_failure(failures, total) {
            return Ok(StageOutcome::Failed(failure));
        }
        Ok(StageOutcome::Completed(serde_json::json!({
            "units": total,
            "ran": pending.len(),
            "skipped_units": skipped,
        })))
    }

    async fn run_link_stage(&self, job: &Job, stage: StageName) -> Result<StageOutcome> {
        let job_id = job.id;
        let boxes = self.documents.load_boxes(&job.document_id).await?;
        let chunks = self.documents.load_chunks(&job.document_id).await?;
        let config = self.settings.link.clone();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<LinkProgress>();
        let tracker = self.tracker.clone();
        let reporter = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                let fraction = p.boxes_scanned as f64 / p.total_boxes.max(1) as f64;
                let patch = ProgressPatch::StageFraction { stage, fraction };
                if let Err(e) = tracker.save_partial_progress(job_id, &patch).await {
                    tracing::warn!(job_id, "linker progress update failed: {:#}", e);
                }
            }
        });

        let linked = tokio::task::spawn_blocking(move || {
            linker::link_with_progress(&boxes, &chunks, &config, |p| {
                let _ = tx.send(p);
            })
        })
        .await
        .context("linker task join")?;
        let _ = reporter.await;

        let result = match linked {
            Ok(r) => r,
            Err(e) => {
                return Ok(StageOutcome::Failed(StageFailure::new(
                    ErrorKind::Permanent,
                    e.to_string(),
                )))
            }
        };
        self.documents
            .save_chunks(&job.document_id, &result.chunks)
            .await?;

        let summary = LinkSummary {
            chunks_linked: result.chunks_linked,
            total_chunks: result.chunks.len(),
            boxes_scanned: result.stats.boxes_scanned,
            timed_out: result.timed_out,
        };
        if summary.timed_out {
            tracing::warn!(
                job_id,
                chunks_linked = summary.chunks_linked,
                total_chunks = summary.total_chunks,
                "linker deadline reached; keeping partial links"
            );
        }
        self.tracker
            .save_partial_progress(job_id, &ProgressPatch::Linker(summary.clone()))
            .await?;
        Ok(StageOutcome::Completed(serde_json::to_value(&summary)?))
    }
}
