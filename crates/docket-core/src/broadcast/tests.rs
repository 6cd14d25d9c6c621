use super::*;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

use crate::tracker::{JobEventKind, JobStatus, NewJob, ProgressPatch};

async fn next(rx: &mut Receiver<ProgressMessage>) -> ProgressMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message within timeout")
        .expect("channel open")
}

#[tokio::test]
async fn publishes_every_write_on_the_matter_channel() {
    let tracker = Tracker::open_in_memory().await.unwrap();
    let transport = Arc::new(LocalTransport::default());
    let mut m1 = transport.subscribe(&matter_channel("m-1"));
    let mut m2 = transport.subscribe(&matter_channel("m-2"));
    let bc = ProgressBroadcaster::spawn(tracker.clone(), transport.clone());

    let id = tracker.create_job(&NewJob::ingest("m-1", "doc", 4)).await.unwrap();
    tracker.claim_next_queued_job().await.unwrap();
    tracker.cancel_job(id).await.unwrap();

    let created = next(&mut m1).await;
    assert_eq!(created.job_id, id);
    assert_eq!(created.event, Some(JobEventKind::Created));
    assert_eq!(created.status, JobStatus::Queued);
    assert_eq!(created.total_stages, 6);

    let claimed = next(&mut m1).await;
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(claimed.revision > created.revision);

    let cancelled = next(&mut m1).await;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.eta_secs, Some(0));

    assert!(m2.try_recv().is_err());
    bc.shutdown().await;
}

#[tokio::test]
async fn lagging_broadcaster_resyncs_to_latest_state() {
    let tracker = Tracker::open_in_memory().await.unwrap();
    let transport = Arc::new(LocalTransport::new(4096));
    let mut rx = transport.subscribe(&matter_channel("m-9"));

    // Subscribe, then overflow the tracker's event buffer before forwarding starts.
    let events = tracker.subscribe();
    let id = tracker.create_job(&NewJob::ingest("m-9", "doc", 1)).await.unwrap();
    for i in 0..1_100 {
        tracker
            .save_partial_progress(
                id,
                &ProgressPatch::Extra {
                    key: "tick".into(),
                    value: serde_json::json!(i),
                },
            )
            .await
            .unwrap();
    }
    let latest = tracker.get_job(id).await.unwrap().unwrap();
    let bc = ProgressBroadcaster::spawn_with(tracker.clone(), events, transport.clone(), 0);

    let mut view = ProgressView::new();
    let first = next(&mut rx).await;
    assert!(first.event.is_none(), "resync snapshot comes first");
    assert_eq!(first.revision, latest.revision);
    view.apply(first);

    // Stale events still buffered after the lag never roll the view back.
    while let Ok(Ok(msg)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        view.apply(msg);
    }
    assert_eq!(view.get(id).unwrap().revision, latest.revision);
    assert_eq!(view.len(), 1);
    bc.shutdown().await;
}

#[tokio::test]
async fn view_keeps_the_highest_revision() {
    let tracker = Tracker::open_in_memory().await.unwrap();
    let id = tracker.create_job(&NewJob::ingest("m", "d", 1)).await.unwrap();
    let v0 = tracker.get_job(id).await.unwrap().unwrap();
    let v1 = tracker.claim_next_queued_job().await.unwrap().unwrap();

    let old = ProgressMessage::from_job(&v0, None, 0);
    let new = ProgressMessage::from_job(&v1, None, 0);

    let mut view = ProgressView::new();
    assert!(view.apply(new.clone()));
    assert!(!view.apply(old));
    assert!(view.apply(new));
    assert_eq!(view.get(id).unwrap().status, JobStatus::Processing);
    assert!(!view.is_empty());
}

#[tokio::test]
async fn resync_publishes_recent_jobs_only() {
    let tracker = Tracker::open_in_memory().await.unwrap();
    let transport = LocalTransport::default();
    let mut rx = transport.subscribe(&matter_channel("m"));
    tracker.create_job(&NewJob::ingest("m", "a", 1)).await.unwrap();
    tracker.create_job(&NewJob::ingest("m", "b", 1)).await.unwrap();

    assert_eq!(resync(&tracker, &transport, 0).await.unwrap(), 2);
    assert_eq!(next(&mut rx).await.document_id, "a");
    assert_eq!(next(&mut rx).await.document_id, "b");
    assert_eq!(resync(&tracker, &transport, i64::MAX).await.unwrap(), 0);
}
