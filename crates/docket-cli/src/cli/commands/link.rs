//! `docket link <boxes.json> <chunks.json>` – run the linker over exported documents.

use anyhow::{Context, Result};
use docket_core::config::DocketConfig;
use docket_core::linker::{self, BoundingBox, Chunk};
use std::path::Path;
use std::time::Duration;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

pub fn run_link(
    cfg: &DocketConfig,
    boxes: &Path,
    chunks: &Path,
    deadline_secs: Option<u64>,
) -> Result<()> {
    let boxes: Vec<BoundingBox> = read_json(boxes)?;
    let chunks: Vec<Chunk> = read_json(chunks)?;
    let mut config = cfg.linker().link_config();
    if let Some(secs) = deadline_secs {
        config.deadline = Duration::from_secs(secs);
    }

    let result = linker::link(&boxes, &chunks, &config)?;
    tracing::info!(
        boxes = boxes.len(),
        chunks = chunks.len(),
        linked = result.chunks_linked,
        timed_out = result.timed_out,
        "linked document"
    );
    if result.timed_out {
        eprintln!(
            "deadline reached after {} of {} boxes; links are partial",
            result.stats.boxes_scanned,
            boxes.len()
        );
    }
    println!("{}", serde_json::to_string_pretty(&result.chunks)?);
    eprintln!("{} of {} chunks linked", result.chunks_linked, result.chunks.len());
    Ok(())
}
