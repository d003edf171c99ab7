//! Service-layer facade over the corpus, classifier and retraining pipeline.
//!
//! Owns the shared [`EnrollmentCorpus`] explicitly; recognition and
//! enrollment management both go through one `Engine`, which is `Sync` and
//! meant to be shared behind an `Arc`.

use crate::centroid::RobustCentroidEstimator;
use crate::classifier::{Classification, ClassifierConfig, ClassifyError, IdentityClassifier};
use crate::corpus::{CorpusError, EnrollmentCorpus};
use crate::crop;
use crate::pipeline::{PipelineError, RetrainReport, RetrainSummary, RetrainingPipeline};
use crate::traits::{
    DetectorError, EmbeddingExtractor, FaceDetector, SampleStore, SampleStoreError,
};
use crate::types::{BoundingBox, IdentityKey};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

/// Bytes of the SHA-256 digest used as a sample id.
const SAMPLE_ID_BYTES: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classification error: {0}")]
    Classify(#[from] ClassifyError),
    #[error("retraining error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),
    #[error("sample store error: {0}")]
    SampleStore(#[from] SampleStoreError),
}

/// Outcome for one detected face in a probe image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum FaceOutcome {
    Classified(Classification),
    /// The face could not be processed; distinct from an `Unknown` match.
    ExtractionFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedFace {
    pub bbox: BoundingBox,
    pub outcome: FaceOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub identity: IdentityKey,
    pub sample_count: usize,
    pub intra_cohesion: f32,
    pub model_version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Content-addressed sample id: hex of the first 16 bytes of SHA-256.
pub fn sample_id(bytes: &[u8]) -> String {
    Sha256::digest(bytes)[..SAMPLE_ID_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct Engine {
    detector: Arc<dyn FaceDetector>,
    extractor: Arc<dyn EmbeddingExtractor>,
    samples: Arc<dyn SampleStore>,
    corpus: Arc<EnrollmentCorpus>,
    classifier: IdentityClassifier,
    pipeline: RetrainingPipeline,
}

impl Engine {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        extractor: Arc<dyn EmbeddingExtractor>,
        samples: Arc<dyn SampleStore>,
        corpus: Arc<EnrollmentCorpus>,
        classifier: ClassifierConfig,
        estimator: RobustCentroidEstimator,
    ) -> Self {
        let pipeline = RetrainingPipeline::new(
            Arc::clone(&detector),
            Arc::clone(&extractor),
            Arc::clone(&samples),
            Arc::clone(&corpus),
            estimator,
        );
        Self {
            detector,
            extractor,
            samples,
            corpus,
            classifier: IdentityClassifier::new(classifier),
            pipeline,
        }
    }

    pub fn corpus(&self) -> &Arc<EnrollmentCorpus> {
        &self.corpus
    }

    pub fn classifier_config(&self) -> &ClassifierConfig {
        self.classifier.config()
    }

    /// Classify a single raw embedding against the current corpus snapshot.
    pub fn classify(&self, query: &[f32]) -> Result<Classification, ClassifyError> {
        self.classifier.classify(query, &self.corpus.snapshot())
    }

    /// Detect, crop, embed and classify every face in a probe image.
    ///
    /// All faces are classified against one snapshot. No faces → empty list.
    pub fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognizedFace>, EngineError> {
        let faces = self.detector.detect(image)?;
        let snapshot = self.corpus.snapshot();
        let mut results = Vec::with_capacity(faces.len());

        for bbox in faces {
            let Some(face) = crop::crop_face(image, &bbox) else {
                tracing::debug!(?bbox, "detected face box lies outside the image");
                results.push(RecognizedFace {
                    bbox,
                    outcome: FaceOutcome::ExtractionFailed {
                        reason: "face box lies outside the image".into(),
                    },
                });
                continue;
            };
            let outcome = match self.extractor.embed(&face) {
                Ok(embedding) => match self.classifier.classify(&embedding.values, &snapshot) {
                    Ok(c) => FaceOutcome::Classified(c),
                    Err(e) => FaceOutcome::ExtractionFailed { reason: e.to_string() },
                },
                Err(e) => {
                    tracing::warn!(error = %e, "probe face extraction failed");
                    FaceOutcome::ExtractionFailed { reason: e.to_string() }
                }
            };
            results.push(RecognizedFace { bbox, outcome });
        }

        tracing::info!(faces = results.len(), identities = snapshot.len(), "probe recognized");
        Ok(results)
    }

    /// Decode an encoded probe image and [`recognize`](Self::recognize) it.
    pub fn recognize_bytes(&self, bytes: &[u8]) -> Result<Vec<RecognizedFace>, EngineError> {
        let image = image::load_from_memory(bytes)?;
        self.recognize(&image)
    }

    /// Store new enrollment images under `key`, then retrain it.
    ///
    /// Identical bytes map to the same sample id, so re-uploads are idempotent.
    pub fn add_images(&self, key: &IdentityKey, images: &[Vec<u8>]) -> Result<RetrainReport, EngineError> {
        for bytes in images {
            let id = sample_id(bytes);
            self.samples.store_raw(key, &id, bytes)?;
            tracing::debug!(identity = %key, sample = %id, bytes = bytes.len(), "enrollment image stored");
        }
        tracing::info!(identity = %key, added = images.len(), "enrollment images stored");
        Ok(self.pipeline.retrain(key, false)?)
    }

    pub fn retrain(&self, key: &IdentityKey, force: bool) -> Result<RetrainReport, EngineError> {
        Ok(self.pipeline.retrain(key, force)?)
    }

    pub fn retrain_all(&self, force: bool) -> Result<RetrainSummary, EngineError> {
        Ok(self.pipeline.retrain_all(force)?)
    }

    /// Discard the identity's samples, then remove its record.
    ///
    /// Returns whether anything (record or samples) existed.
    pub fn remove_identity(&self, key: &IdentityKey) -> Result<bool, EngineError> {
        let had_samples = !self.samples.list_raw(key)?.is_empty();
        self.samples.remove_identity(key)?;
        let had_record = self.corpus.remove(key)?;
        tracing::info!(identity = %key, had_record, had_samples, "identity removed");
        Ok(had_record || had_samples)
    }

    /// Rename an identity, relocating its samples, then enroll any new images
    /// under the new key.
    pub fn rename_identity(
        &self,
        old: &IdentityKey,
        new: &IdentityKey,
        new_images: &[Vec<u8>],
    ) -> Result<Option<RetrainReport>, EngineError> {
        let snapshot = self.corpus.snapshot();
        let enrolled = snapshot.contains(old);
        let has_samples = !self.samples.list_raw(old)?.is_empty();

        if !enrolled && !has_samples {
            return Err(CorpusError::IdentityNotFound(old.to_string()).into());
        }
        if old != new {
            if snapshot.contains(new) || !self.samples.list_raw(new)?.is_empty() {
                return Err(CorpusError::IdentityAlreadyExists(new.to_string()).into());
            }

            if has_samples {
                self.samples.rename_identity(old, new).map_err(|e| match e {
                    SampleStoreError::IdentityAlreadyExists(k) => {
                        EngineError::Corpus(CorpusError::IdentityAlreadyExists(k))
                    }
                    other => other.into(),
                })?;
            }
            if enrolled {
                if let Err(e) = self.corpus.rename(old, new) {
                    if has_samples {
                        if let Err(undo) = self.samples.rename_identity(new, old) {
                            tracing::error!(from = %new, to = %old, error = %undo, "failed to restore samples after rename failure");
                        }
                    }
                    return Err(e.into());
                }
            }
            tracing::info!(from = %old, to = %new, enrolled, has_samples, "identity renamed");
        }

        if new_images.is_empty() {
            return Ok(None);
        }
        self.add_images(new, new_images).map(Some)
    }

    pub fn list_identities(&self) -> Vec<IdentitySummary> {
        self.corpus
            .snapshot()
            .records()
            .iter()
            .map(|r| IdentitySummary {
                identity: r.identity_key.clone(),
                sample_count: r.sample_count,
                intra_cohesion: r.intra_cohesion,
                model_version: r.model_version.clone(),
                updated_at: r.updated_at,
            })
            .collect()
    }
}
