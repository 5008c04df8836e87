pub const SCHEMA: &str = r#"
-- Directories table: one row per directory encountered during a walk.
-- parent_id is derived from the path structure, so the tree is acyclic.
CREATE TABLE IF NOT EXISTS directories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    parent_id INTEGER REFERENCES directories(id)
);

-- Files table: per-file bookkeeping for incremental scanning.
-- processed_at IS NULL is the sole marker for pending work.
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    directory_id INTEGER NOT NULL REFERENCES directories(id),
    name TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    media_kind TEXT,
    processed_at INTEGER
);

-- Detections table: snapshot of the most recent processing of a file.
-- bbox is a JSON array of four coordinates.
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    object_class TEXT NOT NULL,
    confidence REAL NOT NULL,
    frame_index INTEGER,
    bbox TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_directory ON files(directory_id);
CREATE INDEX IF NOT EXISTS idx_detections_file ON detections(file_id);
"#;
