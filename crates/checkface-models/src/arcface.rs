//! ArcFace embedding extractor via ONNX Runtime.
//!
//! Face crops are resized to 112×112 RGB with symmetric normalization and
//! mapped to 512-dimensional embeddings.

use crate::{ensure_exists, ModelError};
use checkface_core::{vector, Embedding, EmbeddingExtractor, ExtractionError};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

pub struct ArcFaceExtractor {
    session: Mutex<Session>,
}

impl ArcFaceExtractor {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        ensure_exists(model_path)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn run(&self, face: &DynamicImage) -> Result<Vec<f32>, ModelError> {
        let input = preprocess(face);

        let mut session = self.session.lock().map_err(|_| ModelError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InvalidOutput(format!("embedding: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ModelError::InvalidOutput(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(raw.to_vec())
    }
}

impl EmbeddingExtractor for ArcFaceExtractor {
    fn embed(&self, face: &DynamicImage) -> Result<Embedding, ExtractionError> {
        let raw = self
            .run(face)
            .map_err(|e| ExtractionError::ExtractionFailed(e.to_string()))?;

        if vector::l2_norm(&raw) <= vector::NORM_EPSILON {
            return Err(ExtractionError::ExtractionFailed("zero embedding".into()));
        }

        Ok(Embedding {
            values: vector::normalize(&raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

/// Resize a face crop into a `[1, 3, 112, 112]` RGB tensor in `[-1, 1]`.
fn preprocess(face: &DynamicImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let rgb = image::imageops::resize(&face.to_rgb8(), size as u32, size as u32, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}
