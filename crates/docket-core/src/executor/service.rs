use async_trait::async_trait;

use crate::retry::ServiceError;
use crate::tracker::{Job, StageName};

/// A recognition, validation, embedding or extraction backend.
///
/// Called once per work unit; `unit` is a page number, a chunk index or 0
/// depending on the stage. Calls must be safe to repeat: a unit whose result
/// was not recorded before a crash is called again.
#[async_trait]
pub trait ExternalService: Send + Sync {
    async fn call(&self, stage: StageName, job: &Job, unit: u64) -> Result<(), ServiceError>;
}

/// Service that accepts every unit. Used by `docket run` without a backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunService;

#[async_trait]
impl ExternalService for DryRunService {
    async fn call(&self, stage: StageName, job: &Job, unit: u64) -> Result<(), ServiceError> {
        tracing::trace!(job_id = job.id, stage = %stage, unit, "dry-run call");
        Ok(())
    }
}
