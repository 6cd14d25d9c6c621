//! `docket skip <id>` – give up on a failed job.

use anyhow::Result;
use docket_core::tracker::{JobId, Tracker};

pub async fn run_skip(tracker: &Tracker, id: JobId) -> Result<()> {
    tracker.skip_job(id).await?;
    println!("Skipped job {id}");
    Ok(())
}
