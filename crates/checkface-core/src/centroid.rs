//! Robust per-identity centroid estimation.
//!
//! Two passes: a naive normalized mean, then a mean over the samples whose
//! distance to it is within `mean + z·stddev`. The trimmed mean is only used
//! when enough samples survive, so small enrollments are never collapsed
//! onto one or two near-duplicates.

use crate::vector::{self, VectorError};
use thiserror::Error;

// --- Reference calibration ---
const DEFAULT_OUTLIER_Z: f32 = 2.0;
const DEFAULT_MIN_RETAINED: usize = 3;
const DEFAULT_RETAIN_FRACTION: f32 = 0.6;

/// Distance spread at or below this is rounding noise and counts as zero.
const ZERO_SPREAD_EPSILON: f64 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CentroidError {
    #[error("centroid requested with zero samples")]
    InsufficientSamples,
    #[error("sample {index}: {source}")]
    InvalidSample {
        index: usize,
        #[source]
        source: VectorError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentroidConfig {
    /// Outlier threshold multiplier on the standard deviation of distances.
    pub outlier_z: f32,
    /// Absolute floor on retained samples before the trimmed mean is used.
    pub min_retained: usize,
    /// Fractional floor (of all samples) on retained samples.
    pub retain_fraction: f32,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            outlier_z: DEFAULT_OUTLIER_Z,
            min_retained: DEFAULT_MIN_RETAINED,
            retain_fraction: DEFAULT_RETAIN_FRACTION,
        }
    }
}

impl CentroidConfig {
    /// `max(min_retained, ceil(retain_fraction × total))`.
    pub fn retention_floor(&self, total: usize) -> usize {
        let fractional = (self.retain_fraction as f64 * total as f64).ceil() as usize;
        self.min_retained.max(fractional)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CentroidEstimate {
    /// Unit-norm representative vector.
    pub centroid: Vec<f32>,
    /// Mean pairwise cosine distance across all input samples.
    pub intra_cohesion: f32,
    pub total: usize,
    /// Samples within the outlier threshold.
    pub retained: usize,
    /// Whether the final centroid is the outlier-trimmed mean.
    pub trimmed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RobustCentroidEstimator {
    config: CentroidConfig,
}

impl RobustCentroidEstimator {
    pub fn new(config: CentroidConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CentroidConfig {
        &self.config
    }

    pub fn estimate<V: AsRef<[f32]>>(&self, samples: &[V]) -> Result<CentroidEstimate, CentroidError> {
        let first = samples.first().ok_or(CentroidError::InsufficientSamples)?;
        let dim = first.as_ref().len();
        for (index, s) in samples.iter().enumerate() {
            vector::validate(s.as_ref(), Some(dim))
                .map_err(|source| CentroidError::InvalidSample { index, source })?;
        }

        let normalized: Vec<Vec<f32>> = samples.iter().map(|s| vector::normalize(s.as_ref())).collect();
        let total = normalized.len();

        // Non-empty, so the mean exists.
        let naive = vector::normalize(&vector::mean(&normalized).unwrap_or_default());

        let distances: Vec<f64> = normalized
            .iter()
            .map(|s| f64::from(vector::cosine_distance(s, &naive)))
            .collect();
        let (mean, stddev) = mean_and_stddev(&distances);

        let retained: Vec<&Vec<f32>> = if stddev <= ZERO_SPREAD_EPSILON {
            normalized.iter().collect()
        } else {
            let threshold = mean + f64::from(self.config.outlier_z) * stddev;
            normalized
                .iter()
                .zip(&distances)
                .filter(|(_, d)| **d <= threshold)
                .map(|(s, _)| s)
                .collect()
        };

        let floor = self.config.retention_floor(total);
        let trimmed = retained.len() < total && retained.len() >= floor;
        let centroid = if trimmed {
            vector::normalize(&vector::mean(&retained).unwrap_or_default())
        } else {
            naive
        };

        tracing::debug!(
            total,
            retained = retained.len(),
            floor,
            trimmed,
            mean_distance = mean,
            stddev,
            "centroid estimated"
        );

        Ok(CentroidEstimate {
            centroid,
            intra_cohesion: mean_pairwise_distance(&normalized),
            total,
            retained: retained.len(),
            trimmed,
        })
    }
}

/// Population mean and standard deviation.
fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Mean cosine distance over all pairs `i < j` of unit vectors; 0 with fewer than two.
pub fn mean_pairwise_distance<V: AsRef<[f32]>>(unit_vectors: &[V]) -> f32 {
    let n = unit_vectors.len();
    if n < 2 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for i in 0..n {
        for j in (i + 1)..n {
            sum += f64::from(vector::cosine_distance(
                unit_vectors[i].as_ref(),
                unit_vectors[j].as_ref(),
            ));
        }
    }
    let pairs = (n * (n - 1) / 2) as f64;
    (sum / pairs) as f32
}
