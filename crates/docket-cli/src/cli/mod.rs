//! CLI for the Docket document pipeline.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docket_core::config;
use docket_core::tracker::{JobId, Tracker};
use std::path::PathBuf;

use commands::{
    run_cancel, run_create, run_link, run_list, run_retry, run_show, run_skip, run_stats,
    run_workers, CreateArgs,
};

/// Top-level CLI for Docket.
#[derive(Debug, Parser)]
#[command(name = "docket")]
#[command(about = "Docket: resumable document processing jobs", long_about = None)]
pub struct Cli {
    /// Tracker database (default: XDG state dir). Workers sharing a file share its queue.
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a document for processing.
    Create {
        /// Matter the document belongs to.
        matter: String,
        /// Document identifier.
        document: String,
        /// Number of scanned pages.
        #[arg(long, default_value = "1")]
        pages: u32,
        /// Retry budget (default: from config).
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
        /// Re-run the pipeline for an already ingested document.
        #[arg(long)]
        reprocess: bool,
    },

    /// Process queued jobs until the queue is empty.
    Run {
        /// Jobs in flight at once (default: from config).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
        /// Print progress messages of this matter as JSON lines.
        #[arg(long, value_name = "MATTER")]
        watch_matter: Option<String>,
    },

    /// List jobs, newest first.
    List {
        /// Only jobs of this matter.
        #[arg(long)]
        matter: Option<String>,
    },

    /// Show one job with its ETA and stage history.
    Show {
        /// Job identifier.
        id: JobId,
    },

    /// Requeue a failed job.
    Retry {
        /// Job identifier.
        id: JobId,
    },

    /// Cancel a queued, processing or failed job.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Give up on a failed job.
    Skip {
        /// Job identifier.
        id: JobId,
    },

    /// Show queue counters.
    Stats,

    /// Link recognized boxes to chunks (JSON files) and print the linked chunks.
    Link {
        /// JSON array of bounding boxes.
        boxes: PathBuf,
        /// JSON array of chunks.
        chunks: PathBuf,
        /// Stop scanning after this many seconds (default: from config).
        #[arg(long, value_name = "SECS")]
        deadline_secs: Option<u64>,
    },
}

async fn open_tracker(db: Option<&PathBuf>) -> Result<Tracker> {
    match db {
        Some(path) => Tracker::open_at(path).await,
        None => Tracker::open_default().await,
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        // Linking works on files only; everything else needs the tracker.
        if let CliCommand::Link {
            boxes,
            chunks,
            deadline_secs,
        } = &cli.command
        {
            return run_link(&cfg, boxes, chunks, *deadline_secs);
        }

        let tracker = open_tracker(cli.db.as_ref()).await?;
        match cli.command {
            CliCommand::Create {
                matter,
                document,
                pages,
                max_retries,
                reprocess,
            } => {
                let args = CreateArgs {
                    matter,
                    document,
                    pages,
                    max_retries: max_retries.unwrap_or(cfg.max_retries),
                    reprocess,
                };
                run_create(&tracker, &args).await?;
            }
            CliCommand::Run {
                workers,
                watch_matter,
            } => {
                let workers = workers.unwrap_or(cfg.workers);
                run_workers(&tracker, &cfg, workers, watch_matter.as_deref()).await?;
            }
            CliCommand::List { matter } => run_list(&tracker, matter.as_deref()).await?,
            CliCommand::Show { id } => run_show(&tracker, id).await?,
            CliCommand::Retry { id } => run_retry(&tracker, id).await?,
            CliCommand::Cancel { id } => run_cancel(&tracker, id).await?,
            CliCommand::Skip { id } => run_skip(&tracker, id).await?,
            CliCommand::Stats => run_stats(&tracker).await?,
            CliCommand::Link { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
