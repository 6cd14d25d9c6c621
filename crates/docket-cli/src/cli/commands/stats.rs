//! `docket stats` – queue counters.

use anyhow::Result;
use docket_core::tracker::Tracker;

pub async fn run_stats(tracker: &Tracker) -> Result<()> {
    let s = tracker.get_queue_stats().await?;
    println!("queued      {}", s.queued);
    println!("processing  {}", s.processing);
    println!("completed   {}", s.completed);
    println!("failed      {}", s.failed);
    println!("skipped     {}", s.skipped);
    println!("cancelled   {}", s.cancelled);
    println!("total       {}", s.total());
    println!("retries     {}", s.total_retries);
    if let Some(at) = s.oldest_queued_at {
        println!("oldest queued at {at}");
    }
    Ok(())
}
