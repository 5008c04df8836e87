//! Video frame sampling: run detection on every Nth frame, keep the best
//! detection per target class, and stop decoding as soon as every target
//! class has one.

use anyhow::{anyhow, Result};
use ffmpeg_next as ffmpeg;
use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::db::Detection;

use super::{DetectOpts, ObjectDetector};

/// Highest-confidence detection seen so far for each class.
#[derive(Debug, Default)]
struct ClassBests {
    best: HashMap<String, Detection>,
}

impl ClassBests {
    /// Record a qualifying detection. An existing entry is replaced only
    /// when the new confidence is strictly greater, so ties keep the
    /// detection from the earlier frame.
    fn observe(&mut self, class_name: &str, confidence: f32, frame_index: i64, bbox: [f32; 4]) {
        let replace = match self.best.get(class_name) {
            Some(prev) => confidence > prev.confidence,
            None => true,
        };
        if replace {
            self.best.insert(
                class_name.to_string(),
                Detection {
                    object_class: class_name.to_string(),
                    confidence,
                    frame_index: Some(frame_index),
                    bbox,
                },
            );
        }
    }

    fn is_complete(&self, targets: &HashSet<String>) -> bool {
        targets.iter().all(|class| self.best.contains_key(class))
    }

    fn into_detections(self) -> Vec<Detection> {
        let mut detections: Vec<Detection> = self.best.into_values().collect();
        // Stable output order across runs
        detections.sort_by(|a, b| a.object_class.cmp(&b.object_class));
        detections
    }
}

/// Decode `path` sequentially and return the best detection per target
/// class found on sampled frames.
///
/// A video with no complete sampled frame (shorter than one stride, or an
/// empty stream) yields zero detections. Demux and decode errors are
/// returned to the caller, which records them against the file.
pub fn sample_video(
    detector: &dyn ObjectDetector,
    path: &Path,
    opts: &DetectOpts,
) -> Result<Vec<Detection>> {
    ffmpeg::init()?;

    let mut ictx = ffmpeg::format::input(&path)?;
    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or(ffmpeg::Error::StreamNotFound)?;
    let stream_index = stream.index();

    let context_decoder =
        ffmpeg::codec::Context::from_parameters(stream.parameters())?;
    let mut decoder = context_decoder.decoder().video()?;

    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )?;

    let mut bests = ClassBests::default();
    let mut frame_index: i64 = 0;
    let mut decoded = ffmpeg::util::frame::Video::empty();
    let mut done = false;

    'demux: for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            if !sample_frame(detector, &mut scaler, &decoded, frame_index, opts, &mut bests)? {
                done = true;
                break 'demux;
            }
            frame_index += 1;
        }
    }

    if !done {
        // Drain frames buffered in the decoder at end of stream
        decoder.send_eof()?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            if !sample_frame(detector, &mut scaler, &decoded, frame_index, opts, &mut bests)? {
                break;
            }
            frame_index += 1;
        }
    }

    let detections = bests.into_detections();
    debug!(
        "Video per-class detections {}: {}",
        detections.len(),
        path.display()
    );
    Ok(detections)
}

/// Handle one decoded frame. Returns false when decoding should stop:
/// the frame cap was reached, or every target class has a detection.
fn sample_frame(
    detector: &dyn ObjectDetector,
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &ffmpeg::util::frame::Video,
    frame_index: i64,
    opts: &DetectOpts,
    bests: &mut ClassBests,
) -> Result<bool> {
    if let Some(cap) = opts.max_video_frames {
        if frame_index >= cap {
            debug!("Reached max video frame cap");
            return Ok(false);
        }
    }

    if frame_index % opts.frame_stride != 0 {
        return Ok(true);
    }

    let mut rgb_frame = ffmpeg::util::frame::Video::empty();
    scaler.run(decoded, &mut rgb_frame)?;
    let img = frame_to_image(&rgb_frame)?;

    for raw in detector.detect(&img)? {
        if !opts.accepts(&raw) {
            continue;
        }
        bests.observe(&raw.class_name, raw.confidence, frame_index, raw.bbox);
    }

    if bests.is_complete(&opts.target_classes) {
        debug!("Early exit: all target classes detected in video");
        return Ok(false);
    }

    Ok(true)
}

/// Copy an RGB24 frame into an owned image, honoring the plane stride.
fn frame_to_image(frame: &ffmpeg::util::frame::Video) -> Result<DynamicImage> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_bytes = width as usize * 3;

    let mut buf = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        buf.extend_from_slice(&data[y * stride..y * stride + row_bytes]);
    }

    let rgb = image::RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| anyhow!("Failed to build image from decoded frame"))?;
    Ok(DynamicImage::ImageRgb8(rgb))
}
