//! `docket retry <id>` – requeue a failed job; completed stages are not redone.

use anyhow::Result;
use docket_core::tracker::{JobId, Tracker};

pub async fn run_retry(tracker: &Tracker, id: JobId) -> Result<()> {
    let job = tracker.retry_job(id).await?;
    println!("Requeued job {id} (retry {} of {})", job.retry_count, job.max_retries);
    Ok(())
}
