use super::*;
use std::time::Duration;

/// Deterministic 9-letter word, distinct enough per (chunk, line, slot) that
/// neighbouring chunks never match within one edit.
fn word(chunk: u32, line: u32, slot: u32) -> String {
    let mut x = (chunk as u64) << 32 | (line as u64) << 8 | slot as u64;
    (0..9)
        .map(|_| {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (b'a' + ((x >> 33) % 26) as u8) as char
        })
        .collect()
}

fn line(chunk: u32, line: u32) -> String {
    (0..4).map(|s| word(chunk, line, s)).collect::<Vec<_>>().join(" ")
}

/// `chunks` chunks, one per page, each with `per_chunk` boxes copying one of
/// its lines.
fn document(chunks: u32, per_chunk: u32) -> (Vec<BoundingBox>, Vec<Chunk>) {
    let mut boxes = Vec::new();
    let mut out = Vec::new();
    for c in 0..chunks {
        let page = c + 1;
        let lines: Vec<String> = (0..per_chunk).map(|l| line(c, l)).collect();
        for (l, text) in lines.iter().enumerate() {
            boxes.push(BoundingBox {
                id: format!("b{c}-{l}"),
                page,
                reading_order: l as u32,
                text: text.clone(),
                geometry: Geometry::default(),
            });
        }
        out.push(Chunk {
            id: format!("c{c}"),
            index: c,
            page_start: page,
            page_end: page,
            content: lines.join("\n"),
            bbox_ids: Default::default(),
        });
    }
    (boxes, out)
}

#[test]
fn links_every_chunk_of_a_large_document() {
    let (boxes, chunks) = document(85, 100);
    assert_eq!(boxes.len(), 8_500);

    let r = link(&boxes, &chunks, &LinkConfig::default()).unwrap();
    assert!(!r.timed_out);
    assert_eq!(r.chunks_linked, 85);
    assert_eq!(r.stats.boxes_scanned, 8_500);
    for c in &r.chunks {
        assert_eq!(c.bbox_ids.len(), 100, "chunk {}", c.id);
        let prefix = format!("b{}-", c.index);
        assert!(c.bbox_ids.iter().all(|id| id.starts_with(&prefix)));
    }
}

#[test]
fn work_stays_bounded_by_batch_and_window() {
    let (boxes, chunks) = document(105, 100);
    assert_eq!(boxes.len(), 10_500);

    let r = link(&boxes, &chunks, &LinkConfig::default()).unwrap();
    assert_eq!(r.stats.max_batch_len, 500);
    assert_eq!(r.stats.batches, 21);
    // Five pages per batch plus one page of margin on each side.
    assert!(r.stats.max_window_chunks <= 7, "{:?}", r.stats);
    // Each box is only compared with chunks within the page margin.
    assert!(r.stats.comparisons <= 3 * boxes.len(), "{:?}", r.stats);
    assert_eq!(r.chunks_linked, 105);
}

#[test]
fn deadline_returns_partial_links() {
    let (boxes, chunks) = document(85, 100);
    let config = LinkConfig {
        deadline: Duration::ZERO,
        ..LinkConfig::default()
    };
    let r = link(&boxes, &chunks, &config).unwrap();
    assert!(r.timed_out);
    assert_eq!(r.stats.batches, 1);
    assert!(r.chunks_linked > 0 && r.chunks_linked < 85, "{}", r.chunks_linked);
    assert_eq!(r.chunks.len(), 85);
}

#[test]
fn relinking_is_idempotent() {
    let (boxes, chunks) = document(6, 20);
    let first = link(&boxes, &chunks, &LinkConfig::default()).unwrap();
    let second = link(&boxes, &first.chunks, &LinkConfig::default()).unwrap();
    assert_eq!(first.chunks, second.chunks);
    assert_eq!(first.chunks_linked, second.chunks_linked);
}

#[test]
fn tolerates_recognition_noise() {
    let chunk = Chunk {
        id: "c0".into(),
        index: 0,
        page_start: 1,
        page_end: 1,
        content: "The indemnification obligations survive termination of this agreement.".into(),
        bbox_ids: Default::default(),
    };
    let noisy = BoundingBox {
        id: "b0".into(),
        page: 1,
        reading_order: 0,
        text: "indemnificatlon obligatlons survive".into(),
        geometry: Geometry::default(),
    };
    let r = link(&[noisy], &[chunk], &LinkConfig::default()).unwrap();
    assert_eq!(r.chunks_linked, 1);
}

#[test]
fn boxes_outside_page_margin_are_never_compared() {
    let (mut boxes, chunks) = document(1, 3);
    for b in &mut boxes {
        b.page = 5;
    }
    let r = link(&boxes, &chunks, &LinkConfig::default()).unwrap();
    assert_eq!(r.chunks_linked, 0);
    assert_eq!(r.stats.comparisons, 0);
}

#[test]
fn empty_inputs_link_nothing() {
    let (_, chunks) = document(3, 2);
    let r = link(&[], &chunks, &LinkConfig::default()).unwrap();
    assert_eq!(r.chunks_linked, 0);
    assert!(!r.timed_out);
    assert_eq!(r.chunks.len(), 3);

    let (boxes, _) = document(3, 2);
    let r = link(&boxes, &[], &LinkConfig::default()).unwrap();
    assert!(r.chunks.is_empty());
}

#[test]
fn rejects_inverted_page_range() {
    let bad = Chunk {
        id: "c9".into(),
        index: 9,
        page_start: 4,
        page_end: 2,
        content: String::new(),
        bbox_ids: Default::default(),
    };
    let err = link(&[], &[bad], &LinkConfig::default()).unwrap_err();
    assert!(matches!(err, LinkError::InvalidChunk { ref id, .. } if id == "c9"));
}

#[test]
fn reports_progress_periodically() {
    let (boxes, chunks) = document(25, 100);
    let mut reports = Vec::new();
    link_with_progress(&boxes, &chunks, &LinkConfig::default(), |p| reports.push(p)).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].boxes_scanned, 1_000);
    assert_eq!(reports[1].total_boxes, 2_500);
}
