//! Recognized bounding boxes and structural chunks per document.

use anyhow::Result;
use sqlx::Row;
use std::collections::BTreeSet;

use super::db::Tracker;
use super::TrackerError;
use crate::linker::{BoundingBox, Chunk, Geometry};

impl Tracker {
    /// Insert or replace bounding boxes of a document.
    pub async fn save_boxes(&self, document_id: &str, boxes: &[BoundingBox]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for b in boxes {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO bounding_boxes (
                    document_id, id, page, reading_order, text, x, y, width, height
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(document_id)
            .bind(&b.id)
            .bind(b.page as i64)
            .bind(b.reading_order as i64)
            .bind(&b.text)
            .bind(b.geometry.x)
            .bind(b.geometry.y)
            .bind(b.geometry.width)
            .bind(b.geometry.height)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Bounding boxes of a document in reading order.
    pub async fn load_boxes(&self, document_id: &str) -> Result<Vec<BoundingBox>> {
        let rows = sqlx::query(
            r#"
            SELECT id, page, reading_order, text, x, y, width, height
            FROM bounding_boxes
            WHERE document_id = ?1
            ORDER BY page ASC, reading_order ASC, id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BoundingBox {
                id: row.get("id"),
                page: row.get::<i64, _>("page") as u32,
                reading_order: row.get::<i64, _>("reading_order") as u32,
                text: row.get("text"),
                geometry: Geometry {
                    x: row.get("x"),
                    y: row.get("y"),
                    width: row.get("width"),
                    height: row.get("height"),
                },
            })
            .collect())
    }

    /// Insert or replace chunks of a document, including their linked box ids.
    pub async fn save_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for c in chunks {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks (
                    document_id, id, chunk_index, page_start, page_end, content, bbox_ids_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(document_id)
            .bind(&c.id)
            .bind(c.index as i64)
            .bind(c.page_start as i64)
            .bind(c.page_end as i64)
            .bind(&c.content)
            .bind(serde_json::to_string(&c.bbox_ids)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Chunks of a document ordered by chunk index.
    pub async fn load_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chunk_index, page_start, page_end, content, bbox_ids_json
            FROM chunks
            WHERE document_id = ?1
            ORDER BY chunk_index ASC, id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let bbox_ids_json: String = row.get("bbox_ids_json");
            let bbox_ids: BTreeSet<String> = serde_json::from_str(&bbox_ids_json)
                .map_err(|e| TrackerError::Corrupt(format!("chunk bbox ids: {e}")))?;
            out.push(Chunk {
                id: row.get("id"),
                index: row.get::<i64, _>("chunk_index") as u32,
                page_start: row.get::<i64, _>("page_start") as u32,
                page_end: row.get::<i64, _>("page_end") as u32,
                content: row.get("content"),
                bbox_ids,
            });
        }
        Ok(out)
    }
}
