pub mod model;
pub mod video;

use anyhow::{Context, Result};
use image::DynamicImage;
use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::db::Detection;
use crate::scanner::media::MediaKind;

/// One raw model output: class name, confidence, `[x1, y1, x2, y2]` box
/// in source-image pixels. Unfiltered; the dispatcher applies the target
/// class set and confidence threshold.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// The detection capability. Implementations must be deterministic within
/// a run: the same image yields the same detections.
pub trait ObjectDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>>;
}

/// Per-run detection policy, shared by the image and video paths.
#[derive(Debug, Clone)]
pub struct DetectOpts {
    pub target_classes: HashSet<String>,
    pub confidence_threshold: f32,
    pub frame_stride: i64,
    pub max_video_frames: Option<i64>,
}

impl DetectOpts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_classes: config.detector.target_classes.iter().cloned().collect(),
            confidence_threshold: config.detector.confidence_threshold,
            // A zero stride would sample nothing and divide by zero
            frame_stride: config.video.frame_stride.max(1),
            max_video_frames: config.video.max_frames,
        }
    }

    fn accepts(&self, raw: &RawDetection) -> bool {
        self.target_classes.contains(&raw.class_name)
            && raw.confidence >= self.confidence_threshold
    }
}

/// Route a file to the image or video detection strategy.
///
/// Errors from the underlying capability propagate unchanged; the scan
/// orchestrator records them against the file and moves on.
pub fn detect_file(
    detector: &dyn ObjectDetector,
    path: &Path,
    kind: MediaKind,
    opts: &DetectOpts,
) -> Result<Vec<Detection>> {
    match kind {
        MediaKind::Image => {
            let img = image::open(path)
                .with_context(|| format!("Failed to load image {}", path.display()))?;
            let raw = detector.detect(&img)?;
            let detections: Vec<Detection> = raw
                .into_iter()
                .filter(|d| opts.accepts(d))
                .map(|d| Detection {
                    object_class: d.class_name,
                    confidence: d.confidence,
                    frame_index: None,
                    bbox: d.bbox,
                })
                .collect();
            tracing::debug!("Image {} detections: {}", detections.len(), path.display());
            Ok(detections)
        }
        MediaKind::Video => video::sample_video(detector, path, opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector {
        detections: Vec<RawDetection>,
    }

    impl ObjectDetector for FixedDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>> {
            Ok(self.detections.clone())
        }
    }

    fn opts() -> DetectOpts {
        DetectOpts {
            target_classes: ["person".to_string(), "dog".to_string()].into_iter().collect(),
            confidence_threshold: 0.35,
            frame_stride: 30,
            max_video_frames: None,
        }
    }

    fn raw(class: &str, confidence: f32) -> RawDetection {
        RawDetection {
            class_name: class.to_string(),
            confidence,
            bbox: [0.0, 0.0, 10.0, 10.0],
        }
    }

    #[test]
    fn test_image_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        image::RgbImage::new(4, 4).save(&path).unwrap();

        let detector = FixedDetector {
            detections: vec![
                raw("person", 0.9),
                raw("person", 0.2),  // below threshold
                raw("cat", 0.95),    // not a target class
                raw("dog", 0.5),
            ],
        };

        let out = detect_file(&detector, &path, MediaKind::Image, &opts()).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|d| d.frame_index.is_none()));
        assert_eq!(out[0].object_class, "person");
        assert_eq!(out[0].confidence, 0.9);
        assert_eq!(out[1].object_class, "dog");
    }

    #[test]
    fn test_unreadable_image_is_an_error() {
        let detector = FixedDetector { detections: vec![] };
        let err = detect_file(
            &detector,
            Path::new("/no/such/image.png"),
            MediaKind::Image,
            &opts(),
        );
        assert!(err.is_err());
    }
}
