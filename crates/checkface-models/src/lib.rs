//! checkface-models: ONNX Runtime implementations of the detector and
//! extractor seams in `checkface-core`.
//!
//! YOLOv8-face finds faces in a full frame; ArcFace (w600k_r50) turns a
//! face crop into a 512-dimensional embedding. Both run on CPU.

pub mod arcface;
pub mod yolo;

pub use arcface::ArcFaceExtractor;
pub use yolo::YoloFaceDetector;

use std::path::Path;
use thiserror::Error;

/// File name of the YOLOv8-face detector inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "yolov8n-face.onnx";
/// File name of the ArcFace recognizer inside the model directory.
pub const EXTRACTOR_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected model output: {0}")]
    InvalidOutput(String),
    #[error("session lock poisoned")]
    Poisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

fn ensure_exists(path: &Path) -> Result<(), ModelError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ModelError::ModelNotFound(path.display().to_string()))
    }
}
