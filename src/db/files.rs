//! File registry: per-path records and the needs-processing decision.

use anyhow::Result;
use rusqlite::params;
use std::path::Path;

use super::Database;

impl Database {
    /// Insert or refresh the record for `path`, returning its id and
    /// whether the file still needs a detection pass.
    ///
    /// A new file, or one whose stored hash or mtime disagrees with the
    /// current fingerprint, gets processed_at reset to NULL. An unchanged
    /// file needs processing only if processed_at is still NULL (for
    /// example after a crash between upsert and detection store).
    pub fn upsert_file(
        &self,
        directory_id: i64,
        path: &Path,
        size: u64,
        mtime: i64,
        content_hash: &str,
        media_kind: &str,
    ) -> Result<(i64, bool)> {
        let path_str = path.to_string_lossy();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let existing = self.conn.query_row(
            "SELECT id, content_hash, mtime, processed_at FROM files WHERE path = ?",
            [path_str.as_ref()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        );

        match existing {
            Ok((file_id, old_hash, old_mtime, processed_at)) => {
                if old_hash != content_hash || old_mtime != mtime {
                    tracing::debug!("File changed, reset processed: {}", path.display());
                    self.conn.execute(
                        r#"
                        UPDATE files
                        SET size = ?, mtime = ?, content_hash = ?, media_kind = ?, processed_at = NULL
                        WHERE id = ?
                        "#,
                        params![size as i64, mtime, content_hash, media_kind, file_id],
                    )?;
                    Ok((file_id, true))
                } else {
                    Ok((file_id, processed_at.is_none()))
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                self.conn.execute(
                    r#"
                    INSERT INTO files (directory_id, name, path, size, mtime, content_hash, media_kind, processed_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
                    "#,
                    params![
                        directory_id,
                        name,
                        path_str.as_ref(),
                        size as i64,
                        mtime,
                        content_hash,
                        media_kind
                    ],
                )?;
                tracing::debug!("New file record: {}", path.display());
                Ok((self.conn.last_insert_rowid(), true))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a record exists for `path`. Used by the read-only diff audit.
    pub fn file_tracked(&self, path: &Path) -> Result<bool> {
        let path_str = path.to_string_lossy();
        let result = self.conn.query_row(
            "SELECT 1 FROM files WHERE path = ?",
            [path_str.as_ref()],
            |_| Ok(()),
        );
        match result {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Processed timestamp for `path`, if the file is tracked.
    #[allow(dead_code)]
    pub fn file_processed_at(&self, path: &Path) -> Result<Option<i64>> {
        let path_str = path.to_string_lossy();
        let result = self.conn.query_row(
            "SELECT processed_at FROM files WHERE path = ?",
            [path_str.as_ref()],
            |row| row.get::<_, Option<i64>>(0),
        );
        match result {
            Ok(ts) => Ok(ts),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Paths with the most detections, for the --summary report.
    pub fn top_files_by_detections(&self, limit: usize) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.path, COUNT(d.id) AS cnt
            FROM files f
            LEFT JOIN detections d ON f.id = d.file_id
            GROUP BY f.id
            ORDER BY cnt DESC
            LIMIT ?
            "#,
        )?;
        let results = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(results)
    }
}
