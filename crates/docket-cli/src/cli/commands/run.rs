//! `docket run` – process queued jobs until the queue is empty.

use anyhow::Result;
use docket_core::broadcast::{matter_channel, LocalTransport, ProgressBroadcaster, Transport};
use docket_core::config::DocketConfig;
use docket_core::executor::{
    default_control_socket_path, run_jobs_parallel, DryRunService, Executor, ExecutorSettings,
    JobControl,
};
use docket_core::governor::{Governor, SqliteSlotStore};
use docket_core::tracker::Tracker;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::control_socket;

pub async fn run_workers(
    tracker: &Tracker,
    cfg: &DocketConfig,
    workers: usize,
    watch_matter: Option<&str>,
) -> Result<()> {
    // Only jobs whose worker stopped renewing its lease; live runs keep theirs.
    let recovered = tracker.recover_processing_jobs().await?;
    if recovered > 0 {
        tracing::info!("recovered {} job(s) with a lapsed lease", recovered);
        println!("Recovered {recovered} interrupted job(s).");
    }

    // Slots live in the tracker database, so every worker on this file shares the bound.
    let settings = ExecutorSettings::from_config(cfg);
    let store = SqliteSlotStore::new(tracker.pool().clone()).await?;
    let governor = Governor::new(Arc::new(store), &settings.governor);

    let job_control = Arc::new(JobControl::new());
    let mut listener = None;
    if let Ok(socket_path) = default_control_socket_path() {
        match control_socket::spawn_control_listener(Arc::clone(&job_control), &socket_path).await
        {
            Ok(l) => {
                tracing::debug!(path = %l.path().display(), "control socket listening");
                listener = Some(l);
            }
            Err(e) => tracing::warn!(path = %socket_path.display(), "control socket bind: {}", e),
        }
    }

    let watcher = watch_matter.map(|matter| {
        let transport = Arc::new(LocalTransport::default());
        let mut rx = transport.subscribe(&matter_channel(matter));
        let transport: Arc<dyn Transport> = transport;
        let broadcaster = ProgressBroadcaster::spawn(tracker.clone(), transport);
        let printer = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => match serde_json::to_string(&msg) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!("progress encode: {}", e),
                    },
                    Err(RecvError::Lagged(n)) => tracing::debug!(missed = n, "progress printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        (broadcaster, printer)
    });

    let executor = Executor::new(
        tracker.clone(),
        governor,
        Arc::new(DryRunService),
        settings,
    )
    .with_control(job_control);
    let run_count = run_jobs_parallel(&executor, workers).await;
    if let Some(listener) = listener {
        listener.shutdown();
    }
    let run_count = run_count?;

    if let Some((broadcaster, printer)) = watcher {
        // Let the last events reach the printer before stopping it.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        broadcaster.shutdown().await;
        printer.abort();
    }

    if run_count == 0 {
        println!("No queued jobs.");
    } else {
        let stats = tracker.get_queue_stats().await?;
        println!(
            "Ran {run_count} job(s): {} completed, {} failed, {} cancelled.",
            stats.completed, stats.failed, stats.cancelled
        );
    }
    Ok(())
}
