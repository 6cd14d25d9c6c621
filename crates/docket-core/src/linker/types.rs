use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Position of a box on its page, in page units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A recognized text region on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub id: String,
    pub page: u32,
    /// Position of the box in the page's reading order.
    pub reading_order: u32,
    pub text: String,
    #[serde(default)]
    pub geometry: Geometry,
}

/// A contiguous span of document text, the unit of downstream analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub index: u32,
    pub page_start: u32,
    pub page_end: u32,
    pub content: String,
    /// Ids of the boxes linked to this chunk.
    #[serde(default)]
    pub bbox_ids: BTreeSet<String>,
}

/// Linker tuning.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Minimum similarity (0.0..=1.0) for a box to link to a chunk.
    pub threshold: f64,
    /// Pages before `page_start` and after `page_end` still searched for a chunk.
    pub page_margin: u32,
    /// Boxes materialized at once.
    pub batch_size: usize,
    /// Report progress every this many boxes.
    pub progress_every: usize,
    /// Wall-clock budget for the whole call.
    pub deadline: Duration,
    /// Boxes with fewer significant tokens are never linked.
    pub min_tokens: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            page_margin: 1,
            batch_size: 500,
            progress_every: 1_000,
            deadline: Duration::from_secs(120),
            min_tokens: 1,
        }
    }
}

/// Cost counters of one linker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub boxes_scanned: usize,
    pub batches: usize,
    /// Largest number of boxes held in one batch.
    pub max_batch_len: usize,
    /// Largest number of chunks indexed at once.
    pub max_window_chunks: usize,
    /// Box/chunk similarity evaluations.
    pub comparisons: usize,
}

/// Output of [`link`](super::link).
#[derive(Debug, Clone)]
pub struct LinkResult {
    /// Chunks that ended up with at least one linked box.
    pub chunks_linked: usize,
    /// Input chunks ordered by index, carrying their linked box ids.
    pub chunks: Vec<Chunk>,
    /// The deadline expired before every box was scanned.
    pub timed_out: bool,
    pub stats: LinkStats,
}

/// Periodic progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkProgress {
    pub boxes_scanned: usize,
    pub total_boxes: usize,
}

/// Malformed linker input. Scale and time never produce an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("chunk {id} ends on page {page_end} before it starts on page {page_start}")]
    InvalidChunk {
        id: String,
        page_start: u32,
        page_end: u32,
    },
}
