//! Background task that persists completed units of the running stage.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::tracker::{JobId, ProgressPatch, StageName, Tracker, UnitSet};

/// Completed units are queued here by the stage loop; one writer per stage run.
pub(super) struct ProgressWriter {
    tx: mpsc::Sender<u64>,
    handle: JoinHandle<()>,
}

impl ProgressWriter {
    /// `done` units of `total` were already complete before this run.
    pub(super) fn spawn(
        tracker: Tracker,
        job_id: JobId,
        stage: StageName,
        total: u64,
        done: u64,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(run_progress_persistence_loop(
            rx, tracker, job_id, stage, total, done,
        ));
        Self { tx, handle }
    }

    pub(super) async fn unit_done(&self, unit: u64) {
        if self.tx.send(unit).await.is_err() {
            tracing::warn!(unit, "progress writer stopped early");
        }
    }

    /// Flush everything queued so far and stop the writer.
    pub(super) async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            tracing::warn!("progress writer task: {}", e);
        }
    }
}

/// Receive finished units, batch whatever is already queued, and merge each
/// batch into the job's metadata followed by the stage fraction.
async fn run_progress_persistence_loop(
    mut rx: mpsc::Receiver<u64>,
    tracker: Tracker,
    job_id: JobId,
    stage: StageName,
    total: u64,
    mut done: u64,
) {
    while let Some(first) = rx.recv().await {
        let mut units = UnitSet::new();
        units.insert(first);
        while let Ok(unit) = rx.try_recv() {
            units.insert(unit);
        }
        done += units.len();

        let patch = ProgressPatch::CompletedUnits { stage, units };
        if let Err(e) = tracker.save_partial_progress(job_id, &patch).await {
            tracing::warn!(job_id, stage = %stage, "durable progress update failed: {:#}", e);
            continue;
        }
        let fraction = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        let patch = ProgressPatch::StageFraction { stage, fraction };
        if let Err(e) = tracker.save_partial_progress(job_id, &patch).await {
            tracing::warn!(job_id, stage = %stage, "progress fraction update failed: {:#}", e);
        }
    }
}
