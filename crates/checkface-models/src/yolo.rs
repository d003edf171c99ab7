//! YOLOv8-face detector via ONNX Runtime.
//!
//! The exported model takes a 640×640 RGB letterboxed frame scaled to
//! `[0, 1]` and emits one `[1, C, N]` tensor: per anchor `cx, cy, w, h,
//! score` followed by optional landmark channels, which are ignored here.

use crate::{ensure_exists, ModelError};
use checkface_core::{BoundingBox, DetectorError, FaceDetector};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

const YOLO_INPUT_SIZE: usize = 640;
const YOLO_PAD_VALUE: f32 = 114.0;
const YOLO_NMS_THRESHOLD: f32 = 0.45;
/// Box (4) + score (1).
const YOLO_MIN_CHANNELS: usize = 5;

/// Metadata for mapping letterboxed coordinates back to the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Raw prediction layout: channel-major `[C, N]` or anchor-major `[N, C]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputLayout {
    channels: usize,
    anchors: usize,
    channel_major: bool,
}

impl OutputLayout {
    fn from_shape(shape: &[i64]) -> Result<Self, ModelError> {
        let dims: Vec<usize> = shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<_, _>>()
            .map_err(|_| ModelError::InvalidOutput(format!("negative dimension in {shape:?}")))?;

        let (a, b) = match dims.as_slice() {
            [1, a, b] => (*a, *b),
            [a, b] => (*a, *b),
            _ => {
                return Err(ModelError::InvalidOutput(format!(
                    "expected [1, C, N] predictions, got {shape:?}"
                )))
            }
        };

        // Anchors always outnumber channels in practice.
        let layout = if a <= b {
            Self { channels: a, anchors: b, channel_major: true }
        } else {
            Self { channels: b, anchors: a, channel_major: false }
        };
        if layout.channels < YOLO_MIN_CHANNELS {
            return Err(ModelError::InvalidOutput(format!(
                "need at least {YOLO_MIN_CHANNELS} channels, got {shape:?}"
            )));
        }
        Ok(layout)
    }

    fn get(&self, data: &[f32], channel: usize, anchor: usize) -> f32 {
        let idx = if self.channel_major {
            channel * self.anchors + anchor
        } else {
            anchor * self.channels + channel
        };
        data.get(idx).copied().unwrap_or(0.0)
    }
}

/// YOLOv8-face detector. The session is locked per call.
pub struct YoloFaceDetector {
    session: Mutex<Session>,
    confidence_threshold: f32,
}

impl YoloFaceDetector {
    /// Load the detector model; detections at or below `confidence_threshold`
    /// are dropped.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, ModelError> {
        ensure_exists(model_path)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            confidence_threshold,
            "loaded YOLOv8-face model"
        );

        Ok(Self {
            session: Mutex::new(session),
            confidence_threshold,
        })
    }

    fn run(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, ModelError> {
        let (input, letterbox) = preprocess(image);

        let mut session = self.session.lock().map_err(|_| ModelError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InvalidOutput(format!("predictions: {e}")))?;
        let layout = OutputLayout::from_shape(shape)?;

        let candidates = decode(data, layout, &letterbox, self.confidence_threshold);
        let mut faces = nms(candidates, YOLO_NMS_THRESHOLD);
        faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(faces)
    }
}

impl FaceDetector for YoloFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::InvalidInput("empty image".into()));
        }
        let faces = self
            .run(image)
            .map_err(|e| DetectorError::InferenceFailed(e.to_string()))?;
        tracing::debug!(faces = faces.len(), "faces detected");
        Ok(faces)
    }
}

fn letterbox_for(width: u32, height: u32) -> (Letterbox, usize, usize) {
    let size = YOLO_INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, YOLO_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, YOLO_INPUT_SIZE);
    let pad_x = (YOLO_INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (YOLO_INPUT_SIZE - new_h) as f32 / 2.0;
    (Letterbox { scale, pad_x, pad_y }, new_w, new_h)
}

/// Letterbox an image into a `[1, 3, 640, 640]` RGB tensor in `[0, 1]`.
fn preprocess(image: &DynamicImage) -> (Array4<f32>, Letterbox) {
    let (letterbox, new_w, new_h) = letterbox_for(image.width(), image.height());
    let resized = image::imageops::resize(
        &image.to_rgb8(),
        new_w as u32,
        new_h as u32,
        FilterType::Triangle,
    );

    let x0 = letterbox.pad_x.floor() as usize;
    let y0 = letterbox.pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::from_elem(
        (1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE),
        YOLO_PAD_VALUE / 255.0,
    );

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel.0[c] as f32 / 255.0;
        }
    }

    (tensor, letterbox)
}

/// Keep anchors scoring above `threshold`, mapped back to frame coordinates.
fn decode(data: &[f32], layout: OutputLayout, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let mut detections = Vec::new();

    for anchor in 0..layout.anchors {
        let score = layout.get(data, 4, anchor);
        if score <= threshold {
            continue;
        }
        let cx = layout.get(data, 0, anchor);
        let cy = layout.get(data, 1, anchor);
        let w = layout.get(data, 2, anchor);
        let h = layout.get(data, 3, anchor);

        detections.push(BoundingBox {
            x: (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y: (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale,
            width: w / letterbox.scale,
            height: h / letterbox.scale,
            confidence: score,
        });
    }

    detections
}

/// Non-maximum suppression, highest confidence first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
