//! `docket cancel <id>` – cancel a job. If `docket run` is active, signals it to stop the job.

use anyhow::Result;
use docket_core::executor::default_control_socket_path;
use docket_core::tracker::{JobId, Tracker};

use crate::cli::control_socket;

pub async fn run_cancel(tracker: &Tracker, id: JobId) -> Result<()> {
    tracker.cancel_job(id).await?;
    // Workers in other processes also notice the status change before their next unit.
    if let Ok(path) = default_control_socket_path() {
        match control_socket::send_cancel_all(&path, id).await {
            Ok(n) => tracing::debug!(job_id = id, runs = n, "cancel sent to running workers"),
            Err(e) => tracing::debug!(path = %path.display(), "control socket send: {}", e),
        }
    }
    println!("Cancelled job {id}");
    Ok(())
}
