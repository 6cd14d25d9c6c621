//! `docket list` – show jobs, optionally of one matter.

use anyhow::Result;
use docket_core::tracker::Tracker;

pub async fn run_list(tracker: &Tracker, matter: Option<&str>) -> Result<()> {
    let jobs = match matter {
        Some(m) => tracker.list_jobs_by_matter(m).await?,
        None => tracker.list_jobs().await?,
    };
    if jobs.is_empty() {
        println!("No jobs in database.");
        return Ok(());
    }
    println!(
        "{:<6} {:<11} {:<18} {:>4} {:<6} {:<14} {}",
        "ID", "STATUS", "STAGE", "PCT", "RETRY", "MATTER", "DOCUMENT"
    );
    for j in jobs {
        let stage = j
            .current_stage
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<11} {:<18} {:>3}% {:<6} {:<14} {}",
            j.id,
            j.status,
            stage,
            j.progress_pct,
            format!("{}/{}", j.retry_count, j.max_retries),
            j.matter_id,
            j.document_id
        );
    }
    Ok(())
}
