//! Retraining pipeline: crop → embed → aggregate → commit, per identity.
//!
//! Crop and embed run on private per-run state with no corpus lock. Per-image
//! failures are counted and skipped. The corpus is touched exactly once, by
//! the final upsert; a run that yields no usable embeddings leaves the
//! previous record in place.

use crate::centroid::{CentroidError, RobustCentroidEstimator};
use crate::corpus::{CorpusError, EnrollmentCorpus};
use crate::crop;
use crate::traits::{EmbeddingExtractor, FaceDetector, SampleStore, SampleStoreError};
use crate::types::{Embedding, IdentityKey, IdentityRecord};
use crate::vector;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("sample store: {0}")]
    SampleStore(#[from] SampleStoreError),
    #[error("centroid: {0}")]
    Centroid(#[from] CentroidError),
    #[error("corpus: {0}")]
    Corpus(#[from] CorpusError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RetrainOutcome {
    Committed { sample_count: usize, intra_cohesion: f32 },
    /// Every image failed crop or embed; the previous record, if any, is kept.
    NoUsableSamples,
}

/// Per-identity counters for one retraining run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainReport {
    pub identity: IdentityKey,
    pub raw_images: usize,
    pub reused_crops: usize,
    pub new_crops: usize,
    pub undecodable: usize,
    pub detection_empty: usize,
    pub detection_failed: usize,
    pub extraction_failed: usize,
    /// Samples skipped because the sample store could not read or write them.
    pub storage_failed: usize,
    pub embedded: usize,
    pub retained: usize,
    pub outcome: RetrainOutcome,
}

impl RetrainReport {
    fn new(identity: IdentityKey) -> Self {
        Self {
            identity,
            raw_images: 0,
            reused_crops: 0,
            new_crops: 0,
            undecodable: 0,
            detection_empty: 0,
            detection_failed: 0,
            extraction_failed: 0,
            storage_failed: 0,
            embedded: 0,
            retained: 0,
            outcome: RetrainOutcome::NoUsableSamples,
        }
    }

    pub fn committed(&self) -> bool {
        matches!(self.outcome, RetrainOutcome::Committed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainFailure {
    pub identity: IdentityKey,
    pub error: String,
}

/// Aggregate of a `retrain_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrainSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub reports: Vec<RetrainReport>,
    pub failures: Vec<RetrainFailure>,
}

pub struct RetrainingPipeline {
    detector: Arc<dyn FaceDetector>,
    extractor: Arc<dyn EmbeddingExtractor>,
    samples: Arc<dyn SampleStore>,
    corpus: Arc<EnrollmentCorpus>,
    estimator: RobustCentroidEstimator,
}

impl RetrainingPipeline {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        extractor: Arc<dyn EmbeddingExtractor>,
        samples: Arc<dyn SampleStore>,
        corpus: Arc<EnrollmentCorpus>,
        estimator: RobustCentroidEstimator,
    ) -> Self {
        Self {
            detector,
            extractor,
            samples,
            corpus,
            estimator,
        }
    }

    /// Retrain one identity from its stored enrollment images.
    ///
    /// With `force`, all existing crops are discarded and regenerated.
    pub fn retrain(&self, key: &IdentityKey, force: bool) -> Result<RetrainReport, PipelineError> {
        let mut report = RetrainReport::new(key.clone());

        let crops = self.crop_phase(key, force, &mut report)?;
        let embeddings = self.embed_phase(key, &crops, &mut report)?;

        if embeddings.is_empty() {
            tracing::warn!(
                identity = %key,
                raw_images = report.raw_images,
                "no usable samples; keeping previous record"
            );
            return Ok(report);
        }

        let estimate = self.estimator.estimate(&embeddings)?;
        report.retained = estimate.retained;

        let mut record = IdentityRecord::new(
            key.clone(),
            estimate.centroid,
            embeddings.len(),
            estimate.intra_cohesion,
        );
        record.model_version = embeddings.iter().find_map(|e| e.model_version.clone());
        self.corpus.upsert(record)?;

        report.outcome = RetrainOutcome::Committed {
            sample_count: embeddings.len(),
            intra_cohesion: estimate.intra_cohesion,
        };
        tracing::info!(
            identity = %key,
            samples = embeddings.len(),
            retained = estimate.retained,
            trimmed = estimate.trimmed,
            intra_cohesion = estimate.intra_cohesion,
            "identity retrained"
        );
        Ok(report)
    }

    /// Retrain every identity that has stored samples. Per-identity errors
    /// are collected in the summary rather than aborting the pass.
    pub fn retrain_all(&self, force: bool) -> Result<RetrainSummary, PipelineError> {
        let mut summary = RetrainSummary::default();

        for key in self.samples.identities()? {
            match self.retrain(&key, force) {
                Ok(report) => {
                    if report.committed() {
                        summary.succeeded += 1;
                    } else {
                        summary.skipped += 1;
                    }
                    summary.reports.push(report);
                }
                Err(e) => {
                    tracing::error!(identity = %key, error = %e, "retrain failed");
                    summary.failed += 1;
                    summary.failures.push(RetrainFailure {
                        identity: key,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "retrain pass complete"
        );
        Ok(summary)
    }

    /// Ensure a crop exists for every raw image; returns the ids that have one.
    fn crop_phase(
        &self,
        key: &IdentityKey,
        force: bool,
        report: &mut RetrainReport,
    ) -> Result<Vec<String>, PipelineError> {
        if force {
            self.samples.clear_cropped(key)?;
        }

        let raw_ids = self.samples.list_raw(key)?;
        let existing: BTreeSet<String> = self.samples.list_cropped(key)?.into_iter().collect();
        report.raw_images = raw_ids.len();

        let mut cropped = Vec::with_capacity(raw_ids.len());
        for id in raw_ids {
            if existing.contains(&id) {
                report.reused_crops += 1;
                cropped.push(id);
                continue;
            }

            let bytes = match self.samples.read_raw(key, &id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(identity = %key, sample = %id, error = %e, "raw sample unreadable, skipping");
                    report.storage_failed += 1;
                    continue;
                }
            };
            let image = match image::load_from_memory(&bytes) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(identity = %key, sample = %id, error = %e, "undecodable image, skipping");
                    report.undecodable += 1;
                    continue;
                }
            };

            let faces = match self.detector.detect(&image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(identity = %key, sample = %id, error = %e, "detection failed, skipping");
                    report.detection_failed += 1;
                    continue;
                }
            };

            let Some(face) = faces.first().and_then(|bbox| crop::crop_face(&image, bbox)) else {
                tracing::warn!(identity = %key, sample = %id, "no face detected, skipping");
                report.detection_empty += 1;
                continue;
            };

            let png = match crop::encode_png(&face) {
                Ok(png) => png,
                Err(e) => {
                    tracing::warn!(identity = %key, sample = %id, error = %e, "crop encode failed, skipping");
                    report.undecodable += 1;
                    continue;
                }
            };
            if let Err(e) = self.samples.store_cropped(key, &id, &png) {
                tracing::warn!(identity = %key, sample = %id, error = %e, "crop not stored, skipping");
                report.storage_failed += 1;
                continue;
            }
            tracing::debug!(identity = %key, sample = %id, "face cropped");
            report.new_crops += 1;
            cropped.push(id);
        }

        Ok(cropped)
    }

    fn embed_phase(
        &self,
        key: &IdentityKey,
        crop_ids: &[String],
        report: &mut RetrainReport,
    ) -> Result<Vec<Embedding>, PipelineError> {
        let mut embeddings = Vec::with_capacity(crop_ids.len());

        for id in crop_ids {
            let bytes = match self.samples.read_cropped(key, id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(identity = %key, sample = %id, error = %e, "crop unreadable, skipping");
                    report.storage_failed += 1;
                    continue;
                }
            };
            let face = match image::load_from_memory(&bytes) {
                Ok(face) => face,
                Err(e) => {
                    tracing::warn!(identity = %key, sample = %id, error = %e, "undecodable crop, skipping");
                    report.undecodable += 1;
                    continue;
                }
            };

            let pinned = embeddings.first().map(Embedding::dimension);
            match self.extractor.embed(&face) {
                Ok(embedding) => {
                    if let Err(e) = vector::validate(&embedding.values, pinned) {
                        tracing::warn!(identity = %key, sample = %id, error = %e, "unusable embedding, skipping");
                        report.extraction_failed += 1;
                        continue;
                    }
                    tracing::debug!(identity = %key, sample = %id, dim = embedding.dimension(), "embedding extracted");
                    embeddings.push(embedding);
                }
                Err(e) => {
                    tracing::warn!(identity = %key, sample = %id, error = %e, "extraction failed, skipping");
                    report.extraction_failed += 1;
                }
            }
        }

        report.embedded = embeddings.len();
        Ok(embeddings)
    }
}
