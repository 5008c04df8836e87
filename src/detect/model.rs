//! YOLO object detection via ONNX Runtime.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::DetectorConfig;

use super::{ObjectDetector, RawDetection};

/// Model input resolution (square).
const INPUT_SIZE: u32 = 640;
/// Raw score floor applied while decoding model output. The configured
/// per-run confidence threshold is applied later by the dispatcher.
const SCORE_FLOOR: f32 = 0.25;
const NMS_THRESHOLD: f32 = 0.45;
/// Retry count for model loading.
const LOAD_RETRIES: usize = 1;

/// COCO class names, in model output order.
const CLASS_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Object detector backed by a YOLO-family ONNX model.
pub struct YoloDetector {
    session: Mutex<Session>,
}

/// Get the models directory path
fn models_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("Could not find local data directory"))?;
    let models_dir = data_dir.join("sentryscan").join("models");
    std::fs::create_dir_all(&models_dir)?;
    Ok(models_dir)
}

/// Resolve the model file, downloading it on first use when no explicit
/// path is configured.
fn ensure_model(config: &DetectorConfig) -> Result<PathBuf> {
    if let Some(ref path) = config.model_path {
        return Ok(path.clone());
    }

    let model_path = models_dir()?.join("yolov8n.onnx");
    if !model_path.exists() {
        tracing::info!(model = %model_path.display(), "Downloading model...");
        let response = ureq::get(&config.model_url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %model_path.display(), "Model downloaded");
    }

    Ok(model_path)
}

impl YoloDetector {
    /// Load the detection model. Failure here is fatal to the run, so one
    /// retry with a short pause covers transient filesystem hiccups.
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let model_path = ensure_model(config)?;

        let mut last_err = None;
        for attempt in 0..=LOAD_RETRIES {
            tracing::info!("Loading detection model: {}", model_path.display());
            match Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(&model_path)
            {
                Ok(session) => {
                    return Ok(Self {
                        session: Mutex::new(session),
                    })
                }
                Err(e) => {
                    tracing::error!("Model load failed attempt {}: {}", attempt + 1, e);
                    last_err = Some(e);
                    if attempt < LOAD_RETRIES {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        }
        Err(last_err
            .map(Into::into)
            .unwrap_or_else(|| anyhow!("Model load failed")))
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;
        run_yolo_detection(&mut session, image)
    }
}

fn run_yolo_detection(session: &mut Session, img: &DynamicImage) -> Result<Vec<RawDetection>> {
    let (orig_width, orig_height) = img.dimensions();

    // Resize image to model input size (use Triangle/bilinear for speed)
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // Convert to tensor (NCHW format, normalized to 0..1)
    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            input_data[idx] = pixel[0] as f32 / 255.0;
            input_data[plane + idx] = pixel[1] as f32 / 255.0;
            input_data[2 * plane + idx] = pixel[2] as f32 / 255.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // Run inference
    let outputs = session.run(ort::inputs!["images" => input_tensor])?;

    let output_value = outputs
        .get("output0")
        .ok_or_else(|| anyhow!("No output0 in model outputs"))?;
    let (output_shape, output_data) = output_value.try_extract_tensor::<f32>()?;

    // Output shape: [1, 4 + num_classes, num_anchors]; rows are
    // cx, cy, w, h followed by one score per class.
    let num_attrs = output_shape[1] as usize;
    let num_anchors = output_shape[2] as usize;
    let num_classes = num_attrs - 4;

    let scale_x = orig_width as f32 / INPUT_SIZE as f32;
    let scale_y = orig_height as f32 / INPUT_SIZE as f32;

    let mut detections = Vec::new();

    for i in 0..num_anchors {
        // Best class for this anchor
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for c in 0..num_classes {
            let score = output_data[(4 + c) * num_anchors + i];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < SCORE_FLOOR {
            continue;
        }

        let cx = output_data[i];
        let cy = output_data[num_anchors + i];
        let w = output_data[2 * num_anchors + i];
        let h = output_data[3 * num_anchors + i];

        let x1 = ((cx - w / 2.0) * scale_x).max(0.0);
        let y1 = ((cy - h / 2.0) * scale_y).max(0.0);
        let x2 = ((cx + w / 2.0) * scale_x).min(orig_width as f32);
        let y2 = ((cy + h / 2.0) * scale_y).min(orig_height as f32);

        let class_name = CLASS_NAMES
            .get(best_class)
            .copied()
            .unwrap_or("unknown")
            .to_string();

        detections.push(RawDetection {
            class_name,
            confidence: best_score,
            bbox: [x1, y1, x2, y2],
        });
    }

    Ok(nms(detections, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections of one class
fn nms(mut detections: Vec<RawDetection>, threshold: f32) -> Vec<RawDetection> {
    // Sort by confidence descending
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[j].class_name != detections[i].class_name {
                continue;
            }

            if compute_iou(&detections[i].bbox, &detections[j].bbox) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection over Union between two `[x1, y1, x2, y2]` boxes
fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: &str, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_name: class.to_string(),
            confidence,
            bbox,
        }
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((compute_iou(&a, &b) - 1.0).abs() < 0.001);

        let c = [20.0, 20.0, 30.0, 30.0];
        assert!((compute_iou(&a, &c) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let dets = vec![
            det("person", 0.9, [0.0, 0.0, 10.0, 10.0]),
            det("person", 0.6, [1.0, 1.0, 10.0, 10.0]),
            det("person", 0.8, [50.0, 50.0, 60.0, 60.0]),
        ];
        let kept = nms(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.8);
    }

    #[test]
    fn test_nms_keeps_overlapping_distinct_classes() {
        let dets = vec![
            det("person", 0.9, [0.0, 0.0, 10.0, 10.0]),
            det("dog", 0.6, [1.0, 1.0, 10.0, 10.0]),
        ];
        let kept = nms(dets, 0.45);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_class_table_has_targets() {
        assert_eq!(CLASS_NAMES[0], "person");
        assert_eq!(CLASS_NAMES[16], "dog");
        assert_eq!(CLASS_NAMES.len(), 80);
    }
}
