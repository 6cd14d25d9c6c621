//! Stage executor: drives claimed jobs through the pipeline.
//!
//! Stages run strictly in order. A service stage fans its pending units out
//! to the [`ExternalService`] with bounded per-job parallelism; each call runs
//! under a governor slot (when the stage is governed), a per-call timeout and
//! the job's cancel token. Units already recorded as complete are never
//! called again, so a retried job resumes where it stopped. Finished units
//! are persisted by a single writer task per stage run.

mod control;
mod documents;
mod parallel;
mod pipeline;
mod progress_writer;
mod run;
mod service;
mod unit;

pub use control::{default_control_socket_path, CancelToken, JobControl};
pub use documents::{DocumentStore, MemoryDocumentStore};
pub use parallel::run_jobs_parallel;
pub use pipeline::{Pipeline, StageMode, StageSpec, UnitSource};
pub use service::{DryRunService, ExternalService};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DocketConfig, GovernorConfig};
use crate::governor::Governor;
use crate::linker::LinkConfig;
use crate::retry::BackoffPolicy;
use crate::tracker::{Job, JobId, Tracker};

/// Tuning of one executor, usually taken from [`DocketConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Units of one job in flight at once.
    pub unit_parallelism: usize,
    pub call_timeout: Duration,
    /// In-place waits on rate-limit signals within one unit.
    pub backoff: BackoffPolicy,
    /// Delay before a requeued job may be claimed again, by retry count.
    pub job_retry: BackoffPolicy,
    pub governor: GovernorConfig,
    pub link: LinkConfig,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &DocketConfig) -> Self {
        Self {
            unit_parallelism: cfg.unit_parallelism.max(1),
            call_timeout: cfg.call_timeout(),
            backoff: cfg.backoff().policy(),
            job_retry: cfg.backoff().policy(),
            governor: cfg.governor(),
            link: cfg.linker().link_config(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&DocketConfig::default())
    }
}

/// Runs jobs. Cheap to clone; clones share the registry of running jobs.
#[derive(Clone)]
pub struct Executor {
    tracker: Tracker,
    governor: Governor,
    service: Arc<dyn ExternalService>,
    documents: Arc<dyn DocumentStore>,
    pipeline: Arc<Pipeline>,
    control: Arc<JobControl>,
    settings: Arc<ExecutorSettings>,
}

impl Executor {
    /// Executor over the default pipeline, reading documents from the tracker database.
    pub fn new(
        tracker: Tracker,
        governor: Governor,
        service: Arc<dyn ExternalService>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            documents: Arc::new(tracker.clone()),
            tracker,
            governor,
            service,
            pipeline: Arc::new(Pipeline::default()),
            control: Arc::new(JobControl::new()),
            settings: Arc::new(settings),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_control(mut self, control: Arc<JobControl>) -> Self {
        self.control = control;
        self
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn control(&self) -> &Arc<JobControl> {
        &self.control
    }

    /// Cancel a job: persist the cancellation, then stop it if it runs here.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        let job = self.tracker.cancel_job(job_id).await?;
        self.control.request_cancel(job_id);
        Ok(job)
    }
}
