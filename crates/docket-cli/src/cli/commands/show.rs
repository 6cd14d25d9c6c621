//! `docket show <id>` – one job with its ETA and stage history.

use anyhow::Result;
use docket_core::tracker::{JobId, Tracker, TrackerError};

pub async fn run_show(tracker: &Tracker, id: JobId) -> Result<()> {
    let job = tracker.get_job(id).await?.ok_or(TrackerError::NotFound(id))?;
    println!("job        {}", job.id);
    println!("matter     {}", job.matter_id);
    println!("document   {} ({} pages, {})", job.document_id, job.page_count, job.job_type.as_str());
    println!("status     {}", job.status);
    if let Some(stage) = job.current_stage {
        println!("stage      {} ({}/{} done)", stage, job.completed_stages, job.total_stages);
    }
    println!("progress   {}%", job.progress_pct);
    println!("retries    {}/{}", job.retry_count, job.max_retries);
    if let Some(msg) = &job.error_message {
        let code = job.error_code.as_deref().unwrap_or("-");
        println!("error      [{code}] {msg}");
    }
    if let Some(b) = &job.metadata.backoff {
        println!(
            "backoff    {} unit {} attempt {} ({:.1}s)",
            b.stage, b.unit, b.attempt, b.delay_secs
        );
    }
    let eta = tracker
        .compute_eta(id)
        .await?
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "?".to_string());
    println!("eta        {eta}");

    let history = tracker.get_stage_history(id).await?;
    if !history.is_empty() {
        println!();
        println!("{:<18} {:>7} {:<11} {}", "STAGE", "ATTEMPT", "STATUS", "ERROR");
        for r in history {
            println!(
                "{:<18} {:>7} {:<11} {}",
                r.stage.as_str(),
                r.attempt,
                r.status.as_str(),
                r.error_message.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
