//! Progress broadcaster: republishes tracker events per matter.
//!
//! Every tracker write becomes a full [`ProgressMessage`] on the job's matter
//! channel (`matter:{id}:progress`). Delivery is at-least-once and unordered
//! across restarts; consumers reconcile with [`ProgressView`]. When the
//! broadcaster falls behind the tracker's event channel it republishes a
//! snapshot of every job written since the last event it handled, so missed
//! events only cost freshness.

mod message;
mod transport;
mod view;

pub use message::{matter_channel, ProgressMessage};
pub use transport::{LocalTransport, Transport};
pub use view::ProgressView;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::tracker::db::unix_timestamp as unix_now;
use crate::tracker::{JobEvent, Tracker};

/// Background task forwarding tracker events to a [`Transport`].
pub struct ProgressBroadcaster {
    handle: JoinHandle<()>,
}

impl ProgressBroadcaster {
    /// Subscribe to `tracker` now and forward its events until shut down.
    pub fn spawn(tracker: Tracker, transport: Arc<dyn Transport>) -> Self {
        let events = tracker.subscribe();
        Self::spawn_with(tracker, events, transport, unix_now())
    }

    pub(crate) fn spawn_with(
        tracker: Tracker,
        events: broadcast::Receiver<JobEvent>,
        transport: Arc<dyn Transport>,
        since: i64,
    ) -> Self {
        let handle = tokio::spawn(forward(tracker, events, transport, since));
        Self { handle }
    }

    /// Stop forwarding. Events already published stay published.
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn forward(
    tracker: Tracker,
    mut events: broadcast::Receiver<JobEvent>,
    transport: Arc<dyn Transport>,
    mut since: i64,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                since = since.max(event.job.updated_at);
                let msg = ProgressMessage::from_job(&event.job, Some(event.kind), unix_now());
                if let Err(e) = transport.publish(&msg.channel(), &msg).await {
                    tracing::warn!(job_id = msg.job_id, "progress publish failed: {:#}", e);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "progress broadcaster lagged; resyncing");
                match resync(&tracker, transport.as_ref(), since).await {
                    Ok(n) => tracing::debug!(jobs = n, "progress resync published"),
                    Err(e) => tracing::warn!("progress resync failed: {:#}", e),
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Publish a snapshot of every job written at or after `since`.
/// Returns the number of snapshots published.
pub async fn resync(tracker: &Tracker, transport: &dyn Transport, since: i64) -> Result<usize> {
    let now = unix_now();
    let jobs = tracker.list_jobs_updated_since(since).await?;
    for job in &jobs {
        let msg = ProgressMessage::from_job(job, None, now);
        transport.publish(&msg.channel(), &msg).await?;
    }
    Ok(jobs.len())
}

#[cfg(test)]
mod tests;
