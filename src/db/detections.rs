//! Detection store: replace-not-accumulate persistence of results.

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;

use super::Database;

/// One detected object, normalized across the image and video paths.
/// `frame_index` is set only for video-sourced detections. The bounding
/// box is `[x1, y1, x2, y2]` in source-image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub object_class: String,
    pub confidence: f32,
    pub frame_index: Option<i64>,
    pub bbox: [f32; 4],
}

impl Database {
    /// Replace all detections for `file_id` with `detections` and stamp the
    /// file processed, in one transaction.
    ///
    /// processed_at is advanced as the final statement, so a crash anywhere
    /// earlier leaves the file pending and it is re-attempted next run.
    pub fn replace_detections(&self, file_id: i64, detections: &[Detection]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM detections WHERE file_id = ?", [file_id])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO detections (file_id, object_class, confidence, frame_index, bbox)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )?;
            for det in detections {
                let bbox = serde_json::to_string(&det.bbox)?;
                stmt.execute(params![
                    file_id,
                    det.object_class,
                    det.confidence,
                    det.frame_index,
                    bbox
                ])?;
            }
        }
        tx.execute(
            "UPDATE files SET processed_at = ? WHERE id = ?",
            params![Utc::now().timestamp(), file_id],
        )?;
        tx.commit()?;
        tracing::debug!("Stored {} detections for file_id={}", detections.len(), file_id);
        Ok(())
    }

    /// Stored detections for a file, ordered by insertion.
    #[allow(dead_code)]
    pub fn detections_for_file(&self, file_id: i64) -> Result<Vec<Detection>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT object_class, confidence, frame_index, bbox
            FROM detections
            WHERE file_id = ?
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([file_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .map(|(object_class, confidence, frame_index, bbox)| {
                let bbox: [f32; 4] = serde_json::from_str(&bbox).unwrap_or([0.0; 4]);
                Detection {
                    object_class,
                    confidence: confidence as f32,
                    frame_index,
                    bbox,
                }
            })
            .collect();
        Ok(rows)
    }
}
