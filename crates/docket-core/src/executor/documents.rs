//! Access to a document's recognized boxes and chunks.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::linker::{BoundingBox, Chunk};
use crate::tracker::Tracker;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_boxes(&self, document_id: &str) -> Result<Vec<BoundingBox>>;
    async fn load_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;
    async fn save_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;
}

/// Boxes and chunks stored in the tracker database.
#[async_trait]
impl DocumentStore for Tracker {
    async fn load_boxes(&self, document_id: &str) -> Result<Vec<BoundingBox>> {
        Tracker::load_boxes(self, document_id).await
    }

    async fn load_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Tracker::load_chunks(self, document_id).await
    }

    async fn save_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        Tracker::save_chunks(self, document_id, chunks).await
    }
}

#[derive(Default)]
struct Doc {
    boxes: Vec<BoundingBox>,
    chunks: Vec<Chunk>,
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, Doc>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document_id: &str, boxes: Vec<BoundingBox>, chunks: Vec<Chunk>) {
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.insert(document_id.to_string(), Doc { boxes, chunks });
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load_boxes(&self, document_id: &str) -> Result<Vec<BoundingBox>> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(document_id).map(|d| d.boxes.clone()).unwrap_or_default())
    }

    async fn load_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(document_id).map(|d| d.chunks.clone()).unwrap_or_default())
    }

    async fn save_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.entry(document_id.to_string()).or_default().chunks = chunks.to_vec();
        Ok(())
    }
}
