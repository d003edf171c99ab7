//! Nearest-centroid identity classification with a hard reject threshold.
//!
//! Cost is O(#identities) regardless of how many photos each identity was
//! enrolled with. A best match at or beyond `reject_distance` is `Unknown`,
//! so an unenrolled face is never assigned to the closest wrong identity.

use crate::corpus::CorpusState;
use crate::types::IdentityKey;
use crate::vector::{self, VectorError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// --- Calibration defaults (cosine distance, ArcFace embedding space) ---
const DEFAULT_REJECT_DISTANCE: f32 = 0.45;
const DEFAULT_SIMILARITY_SCALE: f32 = 100.0;
const MAX_SIMILARITY: f32 = 100.0;

/// The query could not be processed, as opposed to "no match".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("invalid query embedding: {0}")]
    InvalidQuery(#[from] VectorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Best-match distances at or above this are rejected.
    pub reject_distance: f32,
    /// Display mapping: `similarity = 100 − distance × scale`, clamped to `[0, 100]`.
    pub similarity_scale: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            reject_distance: DEFAULT_REJECT_DISTANCE,
            similarity_scale: DEFAULT_SIMILARITY_SCALE,
        }
    }
}

impl ClassifierConfig {
    /// Bounded, monotonically decreasing display score. Not a probability.
    pub fn similarity(&self, distance: f32) -> f32 {
        (MAX_SIMILARITY - distance * self.similarity_scale).clamp(0.0, MAX_SIMILARITY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "key")]
pub enum Identity {
    Known(IdentityKey),
    Unknown,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(key) => write!(f, "{key}"),
            Identity::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Result of classifying one query embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub identity: Identity,
    /// Display score in `[0, 100]`; 0 for `Unknown`.
    pub similarity: f32,
    /// Distance to the nearest centroid, if the corpus was non-empty.
    pub distance: Option<f32>,
}

impl Classification {
    pub fn is_known(&self) -> bool {
        matches!(self.identity, Identity::Known(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityClassifier {
    config: ClassifierConfig,
}

impl IdentityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a raw (unnormalized) query embedding against a corpus snapshot.
    pub fn classify(&self, query: &[f32], corpus: &CorpusState) -> Result<Classification, ClassifyError> {
        vector::validate(query, corpus.dimension())?;
        let query = vector::normalize(query);

        let mut best: Option<(usize, f32)> = None;
        for (i, record) in corpus.records().iter().enumerate() {
            let d = vector::cosine_distance(&query, &record.representative);
            // Strictly smaller only: ties keep the earliest-enrolled identity.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        let classification = match best {
            Some((idx, d)) if d < self.config.reject_distance => Classification {
                identity: Identity::Known(corpus.records()[idx].identity_key.clone()),
                similarity: self.config.similarity(d),
                distance: Some(d),
            },
            _ => Classification {
                identity: Identity::Unknown,
                similarity: 0.0,
                distance: best.map(|(_, d)| d),
            },
        };

        tracing::debug!(
            identity = %classification.identity,
            distance = ?classification.distance,
            similarity = classification.similarity,
            "query classified"
        );
        Ok(classification)
    }
}
