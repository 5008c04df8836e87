pub mod fingerprint;
pub mod media;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::Database;
use crate::detect::{self, DetectOpts, ObjectDetector};
use media::MediaKind;

/// Info log every N media files encountered.
const PROGRESS_LOG_EVERY: usize = 25;

/// A per-file failure recorded during the walk. The scan continues past it.
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Media files encountered on disk.
    pub media_seen: usize,
    /// Files that went through detection and storage this run.
    pub processed: usize,
    /// Files skipped because their stored results are current.
    pub skipped: usize,
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    #[allow(dead_code)]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Drives one run: walks the tree, keeps the registries current, and
/// dispatches detection for files that need it. Owns the per-run
/// directory memo so repeated lookups on deep trees stay cheap.
pub struct Scanner {
    root: PathBuf,
    opts: DetectOpts,
    dir_memo: HashMap<PathBuf, i64>,
}

impl Scanner {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.scanner.root_path.clone(),
            opts: DetectOpts::from_config(config),
            dir_memo: HashMap::new(),
        }
    }

    /// Walk the root, registering every media file and processing the ones
    /// whose stored results are missing or stale. Per-file failures are
    /// collected into the report; only walk-level errors abort the run.
    pub fn scan(&mut self, db: &Database, detector: &dyn ObjectDetector) -> Result<ScanReport> {
        info!("Starting scan of root: {}", self.root.display());
        let mut report = ScanReport::default();

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(kind) = media::classify(path) else {
                continue;
            };

            report.media_seen += 1;
            if report.media_seen % PROGRESS_LOG_EVERY == 0 {
                info!("Progress: {} media files encountered", report.media_seen);
            }

            match self.visit_file(db, detector, path, kind) {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!("Detection failure {}: {:#}", path.display(), e);
                    report.failures.push(ScanFailure {
                        path: path.to_path_buf(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            "Scan complete. Media files seen: {}, processed: {}, skipped: {}, failures: {}",
            report.media_seen,
            report.processed,
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    /// Register one file and run detection if it is pending. Returns true
    /// when a detection pass happened.
    fn visit_file(
        &mut self,
        db: &Database,
        detector: &dyn ObjectDetector,
        path: &Path,
        kind: MediaKind,
    ) -> Result<bool> {
        let parent = path
            .parent()
            .with_context(|| format!("No parent directory for {}", path.display()))?;
        let dir_id = db.resolve_directory(&mut self.dir_memo, parent)?;

        let fp = fingerprint::fingerprint(path)?;
        let (file_id, needs_processing) =
            db.upsert_file(dir_id, path, fp.size, fp.mtime, &fp.sha256, kind.as_str())?;

        if !needs_processing {
            debug!("Skip already processed: {}", path.display());
            return Ok(false);
        }

        debug!("Processing {}: {}", kind.as_str(), path.display());
        let detections = detect::detect_file(detector, path, kind, &self.opts)?;
        db.replace_detections(file_id, &detections)?;
        Ok(true)
    }

    /// Read-only audit: every media path on disk with no file record.
    /// Mutates nothing, including the directory registry.
    pub fn diff(&self, db: &Database) -> Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if media::classify(path).is_none() {
                continue;
            }
            if !db.file_tracked(path)? {
                missing.push(path.to_path_buf());
            }
        }
        missing.sort();
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::detect::RawDetection;
    use anyhow::anyhow;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Deterministic detector that counts how often it runs.
    struct CountingDetector {
        detections: Vec<RawDetection>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingDetector {
        fn person() -> Self {
            Self {
                detections: vec![RawDetection {
                    class_name: "person".to_string(),
                    confidence: 0.9,
                    bbox: [1.0, 2.0, 3.0, 4.0],
                }],
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                detections: Vec::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ObjectDetector for CountingDetector {
        fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Vec<RawDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("inference backend unavailable"));
            }
            Ok(self.detections.clone())
        }
    }

    fn config_for(root: &Path) -> Config {
        let mut config = Config::default();
        config.scanner.root_path = root.to_path_buf();
        config
    }

    fn write_png(path: &Path) {
        image::RgbImage::new(4, 4).save(path).unwrap();
    }

    #[test]
    fn test_scan_registers_and_processes_images() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write_png(&dir.path().join("sub/b.png"));
        std::fs::write(dir.path().join("notes.txt"), b"not media").unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let detector = CountingDetector::person();
        let mut scanner = Scanner::new(&config_for(dir.path()));

        let report = scanner.scan(&db, &detector).unwrap();
        assert_eq!(report.media_seen, 2);
        assert_eq!(report.processed, 2);
        assert!(!report.has_failures());
        assert_eq!(detector.call_count(), 2);

        // Non-media file never got a record
        assert!(!db.file_tracked(&dir.path().join("notes.txt")).unwrap());
        assert!(db
            .file_processed_at(&dir.path().join("a.png"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_second_scan_is_incremental() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"));

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let detector = CountingDetector::person();

        let mut scanner = Scanner::new(&config_for(dir.path()));
        scanner.scan(&db, &detector).unwrap();
        assert_eq!(detector.call_count(), 1);

        // Fresh scanner, same tree: no re-detection
        let mut scanner = Scanner::new(&config_for(dir.path()));
        let report = scanner.scan(&db, &detector).unwrap();
        assert_eq!(detector.call_count(), 1);
        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_changed_file_is_reprocessed_without_leftovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path);

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let detector = CountingDetector::person();

        let mut scanner = Scanner::new(&config_for(dir.path()));
        scanner.scan(&db, &detector).unwrap();

        // Rewrite the image so the hash changes
        image::RgbImage::from_pixel(4, 4, image::Rgb([200, 0, 0]))
            .save(&path)
            .unwrap();

        let mut scanner = Scanner::new(&config_for(dir.path()));
        let report = scanner.scan(&db, &detector).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(detector.call_count(), 2);

        // Replace semantics: one row, from the second pass only
        let mut memo = HashMap::new();
        let dir_id = db.resolve_directory(&mut memo, dir.path()).unwrap();
        let (file_id, needs) = {
            let fp = fingerprint::fingerprint(&path).unwrap();
            db.upsert_file(dir_id, &path, fp.size, fp.mtime, &fp.sha256, "image")
                .unwrap()
        };
        assert!(!needs);
        assert_eq!(db.detections_for_file(file_id).unwrap().len(), 1);
    }

    #[test]
    fn test_failure_is_recorded_and_walk_continues() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        write_png(&dir.path().join("b.png"));

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let detector = CountingDetector::failing();
        let mut scanner = Scanner::new(&config_for(dir.path()));

        let report = scanner.scan(&db, &detector).unwrap();
        assert_eq!(report.media_seen, 2);
        assert_eq!(report.processed, 0);
        assert_eq!(report.failures.len(), 2);

        // Failed files stay pending for the next run
        assert_eq!(
            db.file_processed_at(&dir.path().join("a.png")).unwrap(),
            None
        );
    }

    #[test]
    fn test_diff_reports_untracked_media_only() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("notes.txt"), b"not media").unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let scanner = Scanner::new(&config_for(dir.path()));

        let missing = scanner.diff(&db).unwrap();
        assert_eq!(missing, vec![dir.path().join("a.png")]);

        // diff mutated nothing
        assert!(!db.file_tracked(&dir.path().join("a.png")).unwrap());

        // After a scan the same tree reports no drift
        let detector = CountingDetector::person();
        let mut scanner = Scanner::new(&config_for(dir.path()));
        scanner.scan(&db, &detector).unwrap();
        assert!(scanner.diff(&db).unwrap().is_empty());
    }
}
