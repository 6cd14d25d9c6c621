use std::time::Instant;

use super::similarity::{tokenize, ChunkIndex};
use super::types::{BoundingBox, Chunk, LinkConfig, LinkError, LinkProgress, LinkResult, LinkStats};

/// Link boxes to chunks. See [`link_with_progress`].
pub fn link(
    boxes: &[BoundingBox],
    chunks: &[Chunk],
    config: &LinkConfig,
) -> Result<LinkResult, LinkError> {
    link_with_progress(boxes, chunks, config, |_| {})
}

/// Link boxes to chunks, reporting progress every `config.progress_every` boxes.
///
/// Boxes are scanned in (page, reading order) order, `config.batch_size` at a
/// time. Only chunks whose page range, widened by `config.page_margin`,
/// overlaps the current batch are indexed, so memory and comparisons stay
/// bounded by the local density of chunks instead of the document size.
///
/// The deadline is checked between batches. When it expires the chunks come
/// back with whatever was linked so far and `timed_out` set. Existing
/// `bbox_ids` are kept, so relinking the same input is a no-op.
pub fn link_with_progress<F>(
    boxes: &[BoundingBox],
    chunks: &[Chunk],
    config: &LinkConfig,
    mut on_progress: F,
) -> Result<LinkResult, LinkError>
where
    F: FnMut(LinkProgress),
{
    let started = Instant::now();
    for c in chunks {
        if c.page_end < c.page_start {
            return Err(LinkError::InvalidChunk {
                id: c.id.clone(),
                page_start: c.page_start,
                page_end: c.page_end,
            });
        }
    }

    let mut out: Vec<Chunk> = chunks.to_vec();
    out.sort_by(|a, b| (a.index, &a.id).cmp(&(b.index, &b.id)));

    let mut order: Vec<&BoundingBox> = boxes.iter().collect();
    order.sort_by(|a, b| (a.page, a.reading_order, &a.id).cmp(&(b.page, b.reading_order, &b.id)));

    // Chunk positions in the order they enter the window.
    let mut pending: Vec<usize> = (0..out.len()).collect();
    pending.sort_by_key(|&i| (out[i].page_start, out[i].index));
    let mut pending = pending.into_iter().peekable();

    let margin = config.page_margin;
    let batch_size = config.batch_size.max(1);
    let progress_every = config.progress_every.max(1);
    let total_boxes = order.len();

    let mut window: Vec<(usize, ChunkIndex)> = Vec::new();
    let mut stats = LinkStats::default();
    let mut timed_out = false;

    let mut batches = order.chunks(batch_size).peekable();
    while let Some(batch) = batches.next() {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            break;
        };
        let (first_page, last_page) = (first.page, last.page);

        while let Some(&i) = pending.peek() {
            if out[i].page_start.saturating_sub(margin) > last_page {
                break;
            }
            window.push((i, ChunkIndex::build(&out[i].content)));
            pending.next();
        }
        window.retain(|(i, _)| out[*i].page_end.saturating_add(margin) >= first_page);
        stats.max_window_chunks = stats.max_window_chunks.max(window.len());

        let mut links: Vec<(usize, &str)> = Vec::new();
        for b in batch {
            stats.boxes_scanned += 1;
            let tokens = tokenize(&b.text);
            if !tokens.is_empty() && tokens.len() >= config.min_tokens {
                for (i, index) in &window {
                    let c = &out[*i];
                    if b.page.saturating_add(margin) < c.page_start
                        || b.page > c.page_end.saturating_add(margin)
                    {
                        continue;
                    }
                    stats.comparisons += 1;
                    if index.score(&tokens) >= config.threshold {
                        links.push((*i, b.id.as_str()));
                    }
                }
            }
            if stats.boxes_scanned % progress_every == 0 {
                tracing::debug!(
                    boxes_scanned = stats.boxes_scanned,
                    total_boxes,
                    "linking boxes"
                );
                on_progress(LinkProgress {
                    boxes_scanned: stats.boxes_scanned,
                    total_boxes,
                });
            }
        }
        for (i, id) in links {
            out[i].bbox_ids.insert(id.to_string());
        }

        stats.batches += 1;
        stats.max_batch_len = stats.max_batch_len.max(batch.len());

        if batches.peek().is_some() && started.elapsed() >= config.deadline {
            timed_out = true;
            tracing::warn!(
                boxes_scanned = stats.boxes_scanned,
                total_boxes,
                "linker deadline reached; returning partial links"
            );
            break;
        }
    }

    let chunks_linked = out.iter().filter(|c| !c.bbox_ids.is_empty()).count();
    tracing::debug!(
        chunks_linked,
        total_chunks = out.len(),
        comparisons = stats.comparisons,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "linking finished"
    );
    Ok(LinkResult {
        chunks_linked,
        chunks: out,
        timed_out,
        stats,
    })
}
