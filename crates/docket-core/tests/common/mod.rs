//! Shared helpers for integration tests: a seeded document and a counting service.

#![allow(dead_code)]

use async_trait::async_trait;
use docket_core::executor::ExternalService;
use docket_core::linker::{BoundingBox, Chunk, Geometry};
use docket_core::retry::ServiceError;
use docket_core::tracker::{Job, StageName, Tracker};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Service that records every call and the peak concurrency of one stage.
pub struct CountingService {
    watched: StageName,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<(i64, StageName, u64)>>,
}

impl CountingService {
    pub fn new(watched: StageName, delay: Duration) -> Self {
        Self {
            watched,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self, stage: StageName) -> Vec<(i64, u64)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s, _)| *s == stage)
            .map(|(job, _, unit)| (*job, *unit))
            .collect()
    }
}

#[async_trait]
impl ExternalService for CountingService {
    async fn call(&self, stage: StageName, job: &Job, unit: u64) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push((job.id, stage, unit));
        if stage != self.watched {
            return Ok(());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One box and one chunk per page, with matching text.
pub async fn seed_document(tracker: &Tracker, document_id: &str, pages: u32) {
    let mut boxes = Vec::new();
    let mut chunks = Vec::new();
    for page in 1..=pages {
        let text = format!("affidavit exhibit{page} deposition witness{page}");
        boxes.push(BoundingBox {
            id: format!("{document_id}-b{page}"),
            page,
            reading_order: 0,
            text: text.clone(),
            geometry: Geometry::default(),
        });
        chunks.push(Chunk {
            id: format!("{document_id}-c{page}"),
            index: page - 1,
            page_start: page,
            page_end: page,
            content: text,
            bbox_ids: BTreeSet::new(),
        });
    }
    tracker.save_boxes(document_id, &boxes).await.unwrap();
    tracker.save_chunks(document_id, &chunks).await.unwrap();
}
