//! Worker pool: run queued jobs with several in flight at once.
//!
//! Keeps up to `workers` jobs running; when one finishes the next queued job
//! is claimed, until the queue is empty. Jobs requeued with a delay keep the
//! pool alive until they become claimable. Claims are atomic in the tracker,
//! so several `docket run` processes can share one queue.

use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinSet;

use super::Executor;

/// Shortest sleep while waiting for a delayed job, so a lost claim race does not spin.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Run queued jobs until none are left. Returns how many jobs were run.
pub async fn run_jobs_parallel(executor: &Executor, workers: usize) -> Result<u32> {
    let workers = workers.max(1);
    let mut run_count = 0u32;
    let mut join_set = JoinSet::new();

    loop {
        while join_set.len() < workers {
            let Some(job) = executor.tracker().claim_next_queued_job().await? else {
                break;
            };
            let executor = executor.clone();
            join_set.spawn(async move {
                let job_id = job.id;
                (job_id, executor.run_job(job).await)
            });
        }

        // With a free worker, also wake when a delayed job comes due.
        let wake = if join_set.len() < workers {
            executor.tracker().next_claimable_in().await?
        } else {
            None
        };
        if join_set.is_empty() {
            let Some(wait) = wake else {
                break;
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for a delayed job");
            tokio::time::sleep(wait.max(MIN_WAIT)).await;
            continue;
        }

        let res = match wake {
            Some(wait) => tokio::select! {
                res = join_set.join_next() => res,
                _ = tokio::time::sleep(wait.max(MIN_WAIT)) => continue,
            },
            None => join_set.join_next().await,
        };
        let Some(res) = res else {
            continue;
        };
        run_count += 1;
        match res {
            Ok((job_id, Ok(status))) => {
                tracing::debug!(job_id, status = %status, "worker finished job");
            }
            Ok((job_id, Err(e))) => {
                tracing::error!(job_id, "worker could not record job outcome: {:#}", e);
            }
            Err(e) => tracing::error!("job task join: {}", e),
        }
    }

    Ok(run_count)
}
