//! `docket create` – queue a document for processing.

use anyhow::Result;
use docket_core::executor::Pipeline;
use docket_core::tracker::{JobType, NewJob, Tracker};

pub struct CreateArgs {
    pub matter: String,
    pub document: String,
    pub pages: u32,
    pub max_retries: u32,
    pub reprocess: bool,
}

pub async fn run_create(tracker: &Tracker, args: &CreateArgs) -> Result<()> {
    let job = NewJob {
        matter_id: args.matter.clone(),
        document_id: args.document.clone(),
        job_type: if args.reprocess {
            JobType::Reprocess
        } else {
            JobType::Ingest
        },
        page_count: args.pages,
        max_retries: args.max_retries,
        total_stages: Pipeline::default().stages.len() as u32,
    };
    let id = tracker.create_job(&job).await?;
    println!("Created job {id} for {}/{}", args.matter, args.document);
    Ok(())
}
