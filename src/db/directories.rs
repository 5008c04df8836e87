//! Directory registry: stable ids for directory paths with parent linkage.

use anyhow::Result;
use rusqlite::params;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::Database;

impl Database {
    /// Return the id for `path`, inserting a record (and any missing
    /// ancestors) on first encounter.
    ///
    /// `memo` caches path -> id lookups for the lifetime of one run; the
    /// table remains authoritative across runs.
    pub fn resolve_directory(
        &self,
        memo: &mut HashMap<PathBuf, i64>,
        path: &Path,
    ) -> Result<i64> {
        if let Some(&id) = memo.get(path) {
            return Ok(id);
        }

        let path_str = path.to_string_lossy();
        let result = self.conn.query_row(
            "SELECT id FROM directories WHERE path = ?",
            [path_str.as_ref()],
            |row| row.get::<_, i64>(0),
        );

        let id = match result {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let parent_id = match path.parent() {
                    Some(parent) if parent != path => {
                        Some(self.resolve_directory(memo, parent)?)
                    }
                    _ => None,
                };
                self.conn.execute(
                    "INSERT INTO directories (path, parent_id) VALUES (?, ?)",
                    params![path_str.as_ref(), parent_id],
                )?;
                tracing::debug!("New directory record: {}", path.display());
                self.conn.last_insert_rowid()
            }
            Err(e) => return Err(e.into()),
        };

        memo.insert(path.to_path_buf(), id);
        Ok(id)
    }

    /// Parent id recorded for a directory path, if the directory is known.
    #[allow(dead_code)]
    pub fn directory_parent(&self, path: &Path) -> Result<Option<i64>> {
        let path_str = path.to_string_lossy();
        let result = self.conn.query_row(
            "SELECT parent_id FROM directories WHERE path = ?",
            [path_str.as_ref()],
            |row| row.get::<_, Option<i64>>(0),
        );
        match result {
            Ok(parent) => Ok(parent),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_creates_ancestor_chain() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let mut memo = HashMap::new();

        let id = db
            .resolve_directory(&mut memo, Path::new("/srv/media/photos"))
            .unwrap();

        // All ancestors were inserted and memoized
        assert!(memo.contains_key(Path::new("/srv/media")));
        assert!(memo.contains_key(Path::new("/srv")));
        assert!(memo.contains_key(Path::new("/")));

        let parent = db
            .directory_parent(Path::new("/srv/media/photos"))
            .unwrap()
            .unwrap();
        assert_eq!(parent, memo[Path::new("/srv/media")]);

        // Root has no parent
        assert_eq!(db.directory_parent(Path::new("/")).unwrap(), None);

        // Resolving again returns the same id
        let mut fresh = HashMap::new();
        let again = db
            .resolve_directory(&mut fresh, Path::new("/srv/media/photos"))
            .unwrap();
        assert_eq!(id, again);
    }

    #[test]
    fn test_memo_short_circuits_lookup() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let mut memo = HashMap::new();

        let id = db
            .resolve_directory(&mut memo, Path::new("/data"))
            .unwrap();
        // Poison the table row; a memo hit must not touch the table
        db.conn
            .execute("DELETE FROM directories WHERE id = ?", [id])
            .unwrap();
        let cached = db
            .resolve_directory(&mut memo, Path::new("/data"))
            .unwrap();
        assert_eq!(id, cached);
    }
}
